use chrono::{Datelike, Local};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    /// Case-insensitive `"male"` / `"female"`; any other label is `Other`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "male" => Gender::Male,
            "female" => Gender::Female,
            _ => Gender::Other,
        }
    }

    fn base(&self) -> i32 {
        match self {
            Gender::Male => 220,
            Gender::Female => 226,
            Gender::Other => 223,
        }
    }
}

/// Age-predicted maximum heart rate: 220 - age for men, 226 - age for women,
/// 223 - age otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaxHeartRateResult {
    pub age: i32,
    pub gender: Gender,
    pub max_hr: i32,
}

impl MaxHeartRateResult {
    pub fn from_age(age: i32, gender: Gender) -> Self {
        Self {
            age,
            gender,
            max_hr: gender.base() - age,
        }
    }

    pub fn from_birth_year(birth_year: i32, gender: Gender, current_year: i32) -> Self {
        Self::from_age(current_year - birth_year, gender)
    }

    /// Age taken against the local calendar year.
    pub fn for_current_year(birth_year: i32, gender: Gender) -> Self {
        Self::from_birth_year(birth_year, gender, Local::now().year())
    }
}
