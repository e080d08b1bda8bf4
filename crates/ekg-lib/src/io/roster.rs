use crate::{
    io::text::read_ekg_file,
    metrics::max_hr::{Gender, MaxHeartRateResult},
    signal::{Sample, SampleSeries},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EkgTest {
    pub id: u64,
    #[serde(default)]
    pub date: String,
    /// Path of the recording, relative to the roster's data root unless absolute.
    pub result_link: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub id: u64,
    pub firstname: String,
    pub lastname: String,
    /// Birth year.
    pub date_of_birth: i32,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub picture_path: String,
    #[serde(default)]
    pub ekg_tests: Vec<EkgTest>,
}

impl Person {
    /// `"Lastname Firstname"`, the form the roster is searched by.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.lastname, self.firstname)
    }

    pub fn ekg_test_count(&self) -> usize {
        self.ekg_tests.len()
    }

    pub fn subject(&self) -> SubjectInfo {
        SubjectInfo {
            birth_year: self.date_of_birth,
            gender: Gender::from_label(&self.gender),
        }
    }
}

/// What the analysis needs to know about the person a recording belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectInfo {
    pub birth_year: i32,
    pub gender: Gender,
}

impl SubjectInfo {
    pub fn max_heart_rate(&self, current_year: i32) -> MaxHeartRateResult {
        MaxHeartRateResult::from_birth_year(self.birth_year, self.gender, current_year)
    }
}

/// One recording together with its subject.
#[derive(Debug, Clone)]
pub struct EkgRecord<T: Sample = f64> {
    pub test_id: u64,
    pub date: String,
    pub subject: SubjectInfo,
    pub series: SampleSeries<T>,
}

/// Source of recordings by test identifier.
pub trait RecordLoader {
    fn load_record<T: Sample>(&self, test_id: u64) -> Result<EkgRecord<T>>;
}

/// JSON person database: an array of persons, each listing their EKG tests.
#[derive(Debug, Clone)]
pub struct Roster {
    persons: Vec<Person>,
    data_root: PathBuf,
}

impl Roster {
    pub fn from_json_str(text: &str, data_root: impl Into<PathBuf>) -> Result<Self> {
        let persons: Vec<Person> =
            serde_json::from_str(text).context("parsing person database")?;
        Ok(Self {
            persons,
            data_root: data_root.into(),
        })
    }

    /// Load a roster file; recording links resolve against the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::from_json_str(&text, root)
            .with_context(|| format!("invalid person database {}", path.display()))
    }

    pub fn with_data_root(mut self, data_root: impl Into<PathBuf>) -> Self {
        self.data_root = data_root.into();
        self
    }

    pub fn persons(&self) -> &[Person] {
        &self.persons
    }

    pub fn person_names(&self) -> Vec<String> {
        self.persons.iter().map(Person::full_name).collect()
    }

    pub fn find_by_name(&self, full_name: &str) -> Option<&Person> {
        self.persons.iter().find(|p| p.full_name() == full_name)
    }

    pub fn find_test(&self, test_id: u64) -> Option<(&Person, &EkgTest)> {
        self.persons.iter().find_map(|person| {
            person
                .ekg_tests
                .iter()
                .find(|test| test.id == test_id)
                .map(|test| (person, test))
        })
    }

    pub fn resolve_link(&self, link: &str) -> PathBuf {
        let path = Path::new(link);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_root.join(path)
        }
    }
}

impl RecordLoader for Roster {
    fn load_record<T: Sample>(&self, test_id: u64) -> Result<EkgRecord<T>> {
        let (person, test) = self
            .find_test(test_id)
            .with_context(|| format!("EKG with ID {test_id} not found in person database"))?;
        let path = self.resolve_link(&test.result_link);
        let series = read_ekg_file(&path)
            .with_context(|| format!("loading recording for EKG {test_id}"))?;
        Ok(EkgRecord {
            test_id,
            date: test.date.clone(),
            subject: person.subject(),
            series,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::text::write_ekg_file;

    const ROSTER: &str = r#"[
        {
            "id": 1,
            "firstname": "Julian",
            "lastname": "Huber",
            "date_of_birth": 1989,
            "gender": "male",
            "picture_path": "data/pictures/tb.jpg",
            "ekg_tests": [
                {"id": 1, "date": "10.2.2023", "result_link": "ekg_1.txt"},
                {"id": 2, "date": "11.3.2023", "result_link": "missing.txt"}
            ]
        },
        {
            "id": 2,
            "firstname": "Yannic",
            "lastname": "Heyer",
            "date_of_birth": 1967,
            "gender": "Female",
            "picture_path": "data/pictures/js.jpg"
        }
    ]"#;

    #[test]
    fn lists_and_finds_persons() {
        let roster = Roster::from_json_str(ROSTER, ".").unwrap();
        assert_eq!(roster.person_names(), vec!["Huber Julian", "Heyer Yannic"]);
        let person = roster.find_by_name("Heyer Yannic").unwrap();
        assert_eq!(person.ekg_test_count(), 0);
        assert_eq!(person.subject().gender, Gender::Female);
        assert!(roster.find_by_name("Julian Huber").is_none());

        let (owner, test) = roster.find_test(2).unwrap();
        assert_eq!(owner.id, 1);
        assert_eq!(test.date, "11.3.2023");
        assert!(roster.find_test(9).is_none());
    }

    #[test]
    fn loads_record_relative_to_data_root() {
        let dir = tempfile::tempdir().unwrap();
        let series = SampleSeries::from_uniform(vec![0.0, 1.0, 0.0, -1.0], 500.0).unwrap();
        write_ekg_file(&series, &dir.path().join("ekg_1.txt")).unwrap();
        let roster_path = dir.path().join("person_db.json");
        std::fs::write(&roster_path, ROSTER).unwrap();

        let roster = Roster::load(&roster_path).unwrap();
        let record: EkgRecord<f32> = roster.load_record(1).unwrap();
        assert_eq!(record.date, "10.2.2023");
        assert_eq!(record.series.len(), 4);
        assert_eq!(
            record.subject,
            SubjectInfo {
                birth_year: 1989,
                gender: Gender::Male
            }
        );
        assert_eq!(record.subject.max_heart_rate(2025).max_hr, 220 - 36);
    }

    #[test]
    fn missing_test_or_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let roster = Roster::from_json_str(ROSTER, dir.path()).unwrap();
        let err = roster.load_record::<f64>(42).unwrap_err();
        assert!(err.to_string().contains("EKG with ID 42 not found"));
        assert!(roster.load_record::<f64>(2).is_err());
    }
}
