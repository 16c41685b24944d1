use crate::error::{AppError, Result};
use crate::ml::models::Label;
use csv::{ReaderBuilder, StringRecord};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

/// One CSV record: `text,label`
#[derive(Debug, Deserialize)]
struct Row {
    text: Option<String>,
    label: i64,
}

/// Labelled comments used for training and evaluation
///
/// Texts are kept verbatim apart from rows with blank text, which are
/// dropped on construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabeledDataset {
    texts: Vec<String>,
    labels: Vec<Label>,
}

impl LabeledDataset {
    /// Build a dataset from `(text, label)` pairs, skipping blank texts
    pub fn from_pairs<S, I>(pairs: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, Label)>,
    {
        let mut dataset = Self::default();
        for (text, label) in pairs {
            let text = text.into();
            if text.trim().is_empty() {
                continue;
            }
            dataset.texts.push(text);
            dataset.labels.push(label);
        }
        dataset
    }

    /// Load a CSV file with a `text,label` header
    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| {
            AppError::Validation(format!("cannot open dataset {}: {}", path.display(), e))
        })?;
        let dataset = Self::from_csv_reader(file)?;
        debug!(
            path = %path.display(),
            n_samples = dataset.len(),
            "Loaded dataset"
        );
        Ok(dataset)
    }

    /// Parse CSV records with a `text,label` header
    ///
    /// Labels must be -1, 0 or 1. Rows whose text is missing or blank are
    /// skipped with a warning.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        let mut dataset = Self::default();
        let mut skipped = 0usize;
        let mut record = StringRecord::new();

        while reader.read_record(&mut record)? {
            // Line the record starts on; quoted fields may span several
            let line = record.position().map_or(0, |pos| pos.line());
            let row: Row = record.deserialize(Some(&headers))?;
            let label = Label::try_from(row.label)
                .map_err(|e| AppError::Validation(format!("line {}: {}", line, e)))?;

            match row.text {
                Some(text) if !text.trim().is_empty() => {
                    dataset.texts.push(text);
                    dataset.labels.push(label);
                }
                _ => {
                    skipped += 1;
                    warn!(line, "Skipping row with blank text");
                }
            }
        }

        if skipped > 0 {
            warn!(skipped, kept = dataset.len(), "Dropped rows with blank text");
        }

        Ok(dataset)
    }

    pub fn texts(&self) -> &[String] {
        &self.texts
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    /// Iterate over `(text, label)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, Label)> + '_ {
        self.texts
            .iter()
            .map(String::as_str)
            .zip(self.labels.iter().copied())
    }

    /// Number of samples per label; every label is present, possibly with 0
    pub fn label_distribution(&self) -> BTreeMap<Label, usize> {
        let mut distribution: BTreeMap<Label, usize> = Label::all().map(|l| (l, 0)).collect();
        for label in &self.labels {
            *distribution.entry(*label).or_insert(0) += 1;
        }
        distribution
    }

    /// Number of texts that also occur verbatim in `other`
    pub fn overlap_with(&self, other: &LabeledDataset) -> usize {
        let theirs: HashSet<&str> = other.texts.iter().map(String::as_str).collect();
        self.texts
            .iter()
            .filter(|text| theirs.contains(text.as_str()))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_csv_reader() {
        let data = "text,label\n\"Great video, thanks!\",1\nmeh,0\nawful,-1\n";
        let dataset = LabeledDataset::from_csv_reader(data.as_bytes()).unwrap();

        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.texts()[0], "Great video, thanks!");
        assert_eq!(
            dataset.labels(),
            &[Label::Positive, Label::Neutral, Label::Negative]
        );
    }

    #[test]
    fn test_blank_rows_are_skipped() {
        let data = "text,label\ngood,1\n\"   \",0\n,1\nbad,-1\n";
        let dataset = LabeledDataset::from_csv_reader(data.as_bytes()).unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.labels(), &[Label::Positive, Label::Negative]);
    }

    #[test]
    fn test_invalid_label_is_rejected() {
        let data = "text,label\ngood,1\nweird,2\n";
        let err = LabeledDataset::from_csv_reader(data.as_bytes()).unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_error_line_counts_multiline_fields() {
        let data = "text,label\n\"first line\nsecond line\",1\nweird,2\n";
        let err = LabeledDataset::from_csv_reader(data.as_bytes()).unwrap_err();

        assert!(err.to_string().contains("line 4"), "{}", err);
    }

    #[test]
    fn test_from_csv_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "text,label").unwrap();
        writeln!(file, "love it,1").unwrap();
        writeln!(file, "hate it,-1").unwrap();
        file.flush().unwrap();

        let dataset = LabeledDataset::from_csv_path(file.path()).unwrap();
        assert_eq!(dataset.len(), 2);

        assert!(LabeledDataset::from_csv_path("/nonexistent/train.csv").is_err());
    }

    #[test]
    fn test_label_distribution_and_overlap() {
        let train = LabeledDataset::from_pairs(vec![
            ("a", Label::Positive),
            ("b", Label::Positive),
            ("c", Label::Negative),
            ("", Label::Neutral),
        ]);
        let test = LabeledDataset::from_pairs(vec![("b", Label::Positive), ("z", Label::Neutral)]);

        let distribution = train.label_distribution();
        assert_eq!(distribution[&Label::Positive], 2);
        assert_eq!(distribution[&Label::Negative], 1);
        assert_eq!(distribution[&Label::Neutral], 0);

        assert_eq!(train.overlap_with(&test), 1);
        assert_eq!(train.iter().count(), 3);
    }
}
