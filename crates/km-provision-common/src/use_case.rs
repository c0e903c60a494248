//! Sample-data use case selector

use serde::{Deserialize, Serialize};

/// Which sample dataset the ingestion stage loads
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum UseCase {
    #[default]
    #[strum(serialize = "telecom")]
    #[serde(rename = "telecom")]
    Telecom,
    #[strum(serialize = "IT_helpdesk")]
    #[serde(rename = "IT_helpdesk")]
    ItHelpdesk,
}

impl UseCase {
    /// Directory of the sample data, relative to the data root
    pub fn sample_data_dir(self) -> &'static str {
        match self {
            UseCase::Telecom => "telecom",
            UseCase::ItHelpdesk => "it_helpdesk",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("telecom".parse::<UseCase>().unwrap(), UseCase::Telecom);
        assert_eq!("it_helpdesk".parse::<UseCase>().unwrap(), UseCase::ItHelpdesk);
        assert_eq!("IT_helpdesk".parse::<UseCase>().unwrap(), UseCase::ItHelpdesk);
        assert!("retail".parse::<UseCase>().is_err());
    }

    #[test]
    fn test_sample_data_dir() {
        assert_eq!(UseCase::Telecom.sample_data_dir(), "telecom");
        assert_eq!(UseCase::ItHelpdesk.sample_data_dir(), "it_helpdesk");
        assert_eq!(UseCase::ItHelpdesk.to_string(), "IT_helpdesk");
    }
}
