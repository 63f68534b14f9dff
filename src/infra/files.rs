//! Directory-backed source for exported survey data.
//!
//! Layout under the data directory:
//!
//! ```text
//! entities.csv                      id,type,name,parent_id
//! itineraries.csv                   id,label,starts_on
//! itinerary=<id>/category=<c>.csv   id,entity_id,submitted_at,<answer columns...>
//! itinerary=<id>/submissions.json   [Submission, ...]
//! ```
//!
//! In a category CSV every column after the fixed three is an answer keyed by
//! its header. Blank cells are unanswered.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::hierarchy::{EntityId, EntityKind, EntityRecord};
use crate::services::source::{
    HierarchyProvider, SubmissionSource, filter_submissions, scoped_records, subtree_ids,
};
use crate::submission::{AnswerValue, Category, Itinerary, ItineraryId, Submission};

const FIXED_COLUMNS: [&str; 3] = ["id", "entity_id", "submitted_at"];

#[derive(Deserialize)]
struct EntityRow {
    id: String,
    #[serde(rename = "type")]
    kind: EntityKind,
    name: String,
    parent_id: Option<String>,
}

#[derive(Deserialize)]
struct ItineraryRow {
    id: String,
    label: String,
    starts_on: NaiveDate,
}

pub struct FileSource {
    base_dir: PathBuf,
}

impl FileSource {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn itinerary_dir(&self, itinerary: &ItineraryId) -> PathBuf {
        self.base_dir.join(format!("itinerary={}", itinerary))
    }

    fn load_entities(&self) -> Result<Vec<EntityRecord>> {
        let path = self.base_dir.join("entities.csv");
        let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
        let mut rdr = csv::Reader::from_reader(file);

        let mut records = Vec::new();
        for result in rdr.deserialize() {
            let row: EntityRow = result.with_context(|| format!("reading {}", path.display()))?;
            records.push(EntityRecord {
                id: EntityId(row.id),
                kind: row.kind,
                name: row.name,
                parent_id: row
                    .parent_id
                    .filter(|parent| !parent.trim().is_empty())
                    .map(EntityId),
            });
        }

        Ok(records)
    }

    fn load_itinerary(&self, itinerary: &ItineraryId, category: Option<Category>) -> Result<Vec<Submission>> {
        let dir = self.itinerary_dir(itinerary);
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "No submissions exported for itinerary");
            return Ok(Vec::new());
        }

        let mut submissions = Vec::new();

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };

            if file_name == "submissions.json" {
                let content = fs::read_to_string(&path)?;
                let parsed: Vec<Submission> = serde_json::from_str(&content)
                    .with_context(|| format!("parsing {}", path.display()))?;
                submissions.extend(parsed);
                continue;
            }

            let Some(file_category) = file_name
                .strip_prefix("category=")
                .and_then(|rest| rest.strip_suffix(".csv"))
            else {
                continue;
            };
            let file_category: Category = file_category.parse().map_err(|e: String| anyhow!(e))?;
            if category.is_some_and(|wanted| wanted != file_category) {
                continue;
            }

            submissions.extend(read_category_csv(&path, itinerary, file_category)?);
        }

        debug!(itinerary = %itinerary, count = submissions.len(), "Loaded submissions");
        Ok(submissions)
    }
}

/// Reads one flat category export into submissions.
fn read_category_csv(
    path: &Path,
    itinerary: &ItineraryId,
    category: Category,
) -> Result<Vec<Submission>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr.headers()?.clone();

    let position = |column: &str| {
        headers
            .iter()
            .position(|header| header == column)
            .ok_or_else(|| anyhow!("{} is missing column '{}'", path.display(), column))
    };
    let id_at = position(FIXED_COLUMNS[0])?;
    let entity_at = position(FIXED_COLUMNS[1])?;
    let submitted_at = position(FIXED_COLUMNS[2])?;

    let mut submissions = Vec::new();
    for (line, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("reading {}", path.display()))?;
        let field = |at: usize| record.get(at).unwrap_or("").trim();

        let timestamp: DateTime<Utc> = field(submitted_at).parse().with_context(|| {
            format!("{} row {}: bad submitted_at", path.display(), line + 1)
        })?;

        let answers: BTreeMap<String, AnswerValue> = headers
            .iter()
            .zip(record.iter())
            .filter(|(header, _)| !FIXED_COLUMNS.contains(header))
            .filter_map(|(header, raw)| Some((header.to_string(), AnswerValue::parse(raw)?)))
            .collect();

        submissions.push(Submission {
            id: field(id_at).to_string(),
            entity_id: EntityId::from(field(entity_at)),
            itinerary_id: itinerary.clone(),
            category,
            answers,
            submitted_at: timestamp,
        });
    }

    Ok(submissions)
}

#[async_trait]
impl SubmissionSource for FileSource {
    async fn fetch_itineraries(&self) -> Result<Vec<Itinerary>> {
        let path = self.base_dir.join("itineraries.csv");
        let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
        let mut rdr = csv::Reader::from_reader(file);

        let mut itineraries = Vec::new();
        for result in rdr.deserialize() {
            let row: ItineraryRow = result.with_context(|| format!("reading {}", path.display()))?;
            itineraries.push(Itinerary {
                id: ItineraryId(row.id),
                label: row.label,
                starts_on: row.starts_on,
            });
        }

        Ok(itineraries)
    }

    async fn fetch_submissions(
        &self,
        itinerary: &ItineraryId,
        scope: Option<&EntityId>,
        category: Option<Category>,
    ) -> Result<Vec<Submission>> {
        let submissions = self.load_itinerary(itinerary, category)?;
        let within = match scope {
            Some(scope) => Some(subtree_ids(&self.load_entities()?, scope)),
            None => None,
        };
        Ok(filter_submissions(submissions, within.as_ref(), category))
    }
}

#[async_trait]
impl HierarchyProvider for FileSource {
    async fn fetch_hierarchy(&self, scope: Option<&EntityId>) -> Result<Vec<EntityRecord>> {
        Ok(scoped_records(&self.load_entities()?, scope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "entities.csv",
            "id,type,name,parent_id\n\
             r1,region,Volta,\n\
             d1,district,Ho,r1\n\
             c1,circuit,North,d1\n\
             s1,school,Adaklu,c1\n",
        );
        write(
            dir.path(),
            "itineraries.csv",
            "id,label,starts_on\nt1,First term,2024-01-08\n",
        );
        write(
            dir.path(),
            "itinerary=t1/category=school-output.csv",
            "id,entity_id,submitted_at,lesson_plan,boys\n\
             a,s1,2024-01-10T09:00:00Z,yes,120\n\
             b,s1,2024-01-11T09:00:00Z,,95\n",
        );
        write(
            dir.path(),
            "itinerary=t1/submissions.json",
            r#"[{"id":"j1","entityId":"s1","itineraryId":"t1","categoryId":"consolidated-checklist",
                 "answers":{"desks":true},"submittedAt":"2024-01-12T10:00:00Z"}]"#,
        );
        dir
    }

    #[tokio::test]
    async fn test_reads_entities_and_itineraries() {
        let dir = fixture();
        let source = FileSource::new(dir.path());

        let entities = source.fetch_hierarchy(None).await.unwrap();
        assert_eq!(entities.len(), 4);
        assert_eq!(entities[0].parent_id, None);
        assert_eq!(entities[1].parent_id, Some(EntityId::from("r1")));

        let itineraries = source.fetch_itineraries().await.unwrap();
        assert_eq!(itineraries[0].label, "First term");
    }

    #[tokio::test]
    async fn test_reads_csv_answers_and_json() {
        let dir = fixture();
        let source = FileSource::new(dir.path());

        let mut submissions = source
            .fetch_submissions(&"t1".into(), None, None)
            .await
            .unwrap();
        submissions.sort_by(|a, b| a.id.cmp(&b.id));

        assert_eq!(submissions.len(), 3);
        assert_eq!(
            submissions[0].answer("lesson_plan"),
            Some(&AnswerValue::Text("yes".to_string()))
        );
        assert_eq!(submissions[0].answer("boys"), Some(&AnswerValue::Number(120.0)));
        assert_eq!(submissions[1].answer("lesson_plan"), None);
        assert_eq!(submissions[2].category, Category::ConsolidatedChecklist);
    }

    #[tokio::test]
    async fn test_category_filter_skips_other_files() {
        let dir = fixture();
        let source = FileSource::new(dir.path());

        let checklist = source
            .fetch_submissions(&"t1".into(), None, Some(Category::ConsolidatedChecklist))
            .await
            .unwrap();
        assert_eq!(checklist.len(), 1);
        assert_eq!(checklist[0].id, "j1");
    }

    #[tokio::test]
    async fn test_missing_itinerary_dir_is_empty() {
        let dir = fixture();
        let source = FileSource::new(dir.path());
        let none = source.fetch_submissions(&"t9".into(), None, None).await.unwrap();
        assert!(none.is_empty());
    }
}
