use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::course::ScoreUpdate;
use crate::models::ComponentScores;

/// One row of a score sheet. Blank cells leave the stored value untouched.
#[derive(Debug, Deserialize)]
struct CsvRow {
    uid: String,
    score_theory_ise: Option<f64>,
    score_theory_mse: Option<f64>,
    score_theory_ese: Option<f64>,
    score_lab_ise: Option<f64>,
    score_lab_mse: Option<f64>,
    score_lab_ese: Option<f64>,
    flag_not_present: Option<bool>,
    flag_defaulter: Option<bool>,
}

impl From<CsvRow> for ScoreUpdate {
    fn from(row: CsvRow) -> Self {
        ScoreUpdate {
            uid: row.uid.trim().to_string(),
            scores: ComponentScores {
                theory_ise: row.score_theory_ise,
                theory_mse: row.score_theory_mse,
                theory_ese: row.score_theory_ese,
                lab_ise: row.score_lab_ise,
                lab_mse: row.score_lab_mse,
                lab_ese: row.score_lab_ese,
            },
            flag_not_present: row.flag_not_present,
            flag_defaulter: row.flag_defaulter,
        }
    }
}

pub fn read_score_sheet(csv_path: &Path) -> anyhow::Result<Vec<ScoreUpdate>> {
    let reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    read_rows(reader)
}

fn read_rows<R: std::io::Read>(mut reader: csv::Reader<R>) -> anyhow::Result<Vec<ScoreUpdate>> {
    let mut updates = Vec::new();
    for (index, row) in reader.deserialize::<CsvRow>().enumerate() {
        // header is line 1
        let row = row.with_context(|| format!("invalid score sheet row {}", index + 2))?;
        updates.push(ScoreUpdate::from(row));
    }
    Ok(updates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HEADER: &str = "uid,score_theory_ise,score_theory_mse,score_theory_ese,\
score_lab_ise,score_lab_mse,score_lab_ese,flag_not_present,flag_defaulter";

    #[test]
    fn blank_cells_become_empty_fields() {
        let data = format!("{HEADER}\n2022300001,18,25,,,,,,\n2022300002,,,,,,,true,false\n");
        let updates = read_rows(csv::Reader::from_reader(data.as_bytes())).unwrap();

        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].uid, "2022300001");
        assert_eq!(updates[0].scores.theory_ise, Some(18.0));
        assert_eq!(updates[0].scores.theory_mse, Some(25.0));
        assert_eq!(updates[0].scores.theory_ese, None);
        assert_eq!(updates[0].flag_not_present, None);
        assert_eq!(updates[1].scores, ComponentScores::default());
        assert_eq!(updates[1].flag_not_present, Some(true));
        assert_eq!(updates[1].flag_defaulter, Some(false));
    }

    #[test]
    fn bad_numbers_report_the_line() {
        let data = format!("{HEADER}\n2022300001,eighteen,,,,,,,\n");
        let err = read_rows(csv::Reader::from_reader(data.as_bytes())).unwrap_err();
        assert!(err.to_string().contains("row 2"));
    }

    #[test]
    fn reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{HEADER}").unwrap();
        writeln!(file, "2022300003,20,30,50,25,25,50,,").unwrap();
        file.flush().unwrap();

        let updates = read_score_sheet(file.path()).unwrap();
        assert_eq!(updates[0].scores.lab_ese, Some(50.0));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(read_score_sheet(Path::new("/nonexistent/scores.csv")).is_err());
    }
}
