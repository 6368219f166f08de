//! Hypnogram normalization
//!
//! Turns arbitrary persisted phase rows into a clean segment list for chart
//! consumers: invalid rows are dropped and counted, overlaps are trimmed,
//! contiguous rows of the same stage and cycle are merged, and times become
//! minutes from the session start.

use crate::types::{parse_timestamp, SleepStage};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// A phase row as stored by the persistence layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseRow {
    #[serde(default, deserialize_with = "deserialize_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub stage: String,
    #[serde(default)]
    pub cycle_number: Option<u32>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    /// Stored duration (minutes); informational, the timestamps are authoritative
    #[serde(default)]
    pub duration_minutes: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// One drawable segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypnogramSegment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Rendering label: `awake`, `light`, `deep` or `core` (REM)
    pub stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle_number: Option<u32>,
    pub start_minute: f64,
    pub end_minute: f64,
    pub duration_minutes: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypnogramData {
    pub session_start: DateTime<FixedOffset>,
    pub session_end: DateTime<FixedOffset>,
    pub total_minutes: f64,
    pub segments: Vec<HypnogramSegment>,
}

/// Normalized hypnogram; `data` is `None` when no row survived
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypnogramResult {
    pub data: Option<HypnogramData>,
    pub dropped_rows: usize,
}

#[derive(Debug, Clone)]
struct ParsedRow {
    id: Option<String>,
    stage: SleepStage,
    cycle: Option<u32>,
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
    confidence: Option<f64>,
}

impl ParsedRow {
    fn minutes(&self) -> f64 {
        (self.end - self.start).num_seconds() as f64 / 60.0
    }
}

/// Hypnogram normalizer for persisted phase rows
pub struct HypnogramNormalizer;

impl HypnogramNormalizer {
    pub fn normalize(rows: &[PhaseRow]) -> HypnogramResult {
        if rows.is_empty() {
            return HypnogramResult {
                data: None,
                dropped_rows: 0,
            };
        }

        let mut parsed: Vec<ParsedRow> = rows.iter().filter_map(parse_row).collect();
        let mut dropped = rows.len() - parsed.len();

        parsed.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));

        let before_trim = parsed.len();
        let trimmed = trim_overlaps(parsed);
        dropped += before_trim - trimmed.len();

        if dropped > 0 {
            warn!(dropped, total = rows.len(), "dropped invalid hypnogram rows");
        }

        let merged = merge_contiguous(trimmed);
        let (Some(first), Some(last)) = (merged.first(), merged.last()) else {
            return HypnogramResult {
                data: None,
                dropped_rows: dropped,
            };
        };
        let session_start = first.start;
        let session_end = last.end;

        let offset = |ts: DateTime<FixedOffset>| (ts - session_start).num_seconds() as f64 / 60.0;
        let segments = merged
            .iter()
            .map(|row| HypnogramSegment {
                id: row.id.clone(),
                stage: render_label(row.stage).to_string(),
                cycle_number: row.cycle,
                start_minute: offset(row.start),
                end_minute: offset(row.end),
                duration_minutes: row.minutes(),
                confidence: row.confidence,
            })
            .collect();

        HypnogramResult {
            data: Some(HypnogramData {
                session_start,
                session_end,
                total_minutes: offset(session_end),
                segments,
            }),
            dropped_rows: dropped,
        }
    }
}

fn parse_row(row: &PhaseRow) -> Option<ParsedRow> {
    let stage = parse_stage(&row.stage)?;
    let start = row.start_time.as_deref().and_then(parse_timestamp)?;
    let end = row.end_time.as_deref().and_then(parse_timestamp)?;
    if end <= start {
        return None;
    }
    if row.duration_minutes.is_some_and(|d| !(d.is_finite() && d > 0.0)) {
        return None;
    }
    Some(ParsedRow {
        id: row.id.clone(),
        stage,
        cycle: row.cycle_number,
        start,
        end,
        confidence: row.confidence.filter(|c| c.is_finite()),
    })
}

fn parse_stage(raw: &str) -> Option<SleepStage> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "awake" | "wake" => Some(SleepStage::Awake),
        "light" => Some(SleepStage::Light),
        "deep" => Some(SleepStage::Deep),
        "rem" | "core" => Some(SleepStage::Rem),
        _ => None,
    }
}

fn render_label(stage: SleepStage) -> &'static str {
    match stage {
        SleepStage::Rem => "core",
        other => other.as_str(),
    }
}

/// Clip each row to start no earlier than the previous row's end; rows left
/// empty are removed
fn trim_overlaps(rows: Vec<ParsedRow>) -> Vec<ParsedRow> {
    let mut out: Vec<ParsedRow> = Vec::with_capacity(rows.len());
    for mut row in rows {
        if let Some(prev) = out.last() {
            if row.start < prev.end {
                row.start = prev.end;
            }
        }
        if row.end > row.start {
            out.push(row);
        }
    }
    out
}

fn merge_contiguous(rows: Vec<ParsedRow>) -> Vec<ParsedRow> {
    let mut out: Vec<ParsedRow> = Vec::with_capacity(rows.len());
    for row in rows {
        match out.last_mut() {
            Some(prev)
                if prev.end == row.start && prev.stage == row.stage && prev.cycle == row.cycle =>
            {
                let (a, b) = (prev.minutes(), row.minutes());
                prev.confidence = match (prev.confidence, row.confidence) {
                    (Some(x), Some(y)) => Some((x * a + y * b) / (a + b)),
                    (x, y) => x.or(y),
                };
                prev.end = row.end;
            }
            _ => out.push(row),
        }
    }
    out
}

/// Ids arrive as strings or numbers
fn deserialize_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(id: &str, stage: &str, cycle: u32, start: &str, end: &str) -> PhaseRow {
        PhaseRow {
            id: Some(id.to_string()),
            stage: stage.to_string(),
            cycle_number: Some(cycle),
            start_time: Some(format!("2024-01-15T{start}:00Z")),
            end_time: Some(format!("2024-01-15T{end}:00Z")),
            duration_minutes: None,
            confidence: Some(0.9),
        }
    }

    #[test]
    fn test_empty_input() {
        let result = HypnogramNormalizer::normalize(&[]);
        assert_eq!(result.data, None);
        assert_eq!(result.dropped_rows, 0);
    }

    #[test]
    fn test_all_invalid_rows() {
        let rows = vec![
            row("a", "light", 1, "22:00", "21:00"),
            PhaseRow {
                start_time: Some("garbage".to_string()),
                ..row("b", "deep", 1, "22:00", "22:30")
            },
        ];
        let result = HypnogramNormalizer::normalize(&rows);
        assert_eq!(result.data, None);
        assert_eq!(result.dropped_rows, 2);
    }

    #[test]
    fn test_sorts_relabels_and_offsets() {
        let rows = vec![
            row("3", "rem", 1, "23:40", "23:50"),
            row("1", "awake", 0, "23:00", "23:10"),
            row("2", "deep", 1, "23:10", "23:40"),
        ];
        let data = HypnogramNormalizer::normalize(&rows).data.unwrap();

        let labels: Vec<&str> = data.segments.iter().map(|s| s.stage.as_str()).collect();
        assert_eq!(labels, vec!["awake", "deep", "core"]);
        assert_eq!(data.segments[0].start_minute, 0.0);
        assert_eq!(data.segments[2].start_minute, 40.0);
        assert_eq!(data.segments[2].end_minute, 50.0);
        assert_eq!(data.total_minutes, 50.0);
    }

    #[test]
    fn test_trims_overlaps_and_drops_swallowed_rows() {
        let rows = vec![
            row("1", "light", 1, "23:00", "23:30"),
            row("2", "deep", 1, "23:20", "23:50"),
            row("3", "light", 1, "23:25", "23:45"),
        ];
        let result = HypnogramNormalizer::normalize(&rows);
        let data = result.data.unwrap();

        assert_eq!(result.dropped_rows, 1);
        assert_eq!(data.segments.len(), 2);
        assert_eq!(data.segments[1].start_minute, 30.0);
        assert_eq!(data.segments[1].duration_minutes, 20.0);
    }

    #[test]
    fn test_merges_contiguous_same_stage_rows() {
        let mut second = row("2", "light", 1, "23:20", "23:30");
        second.confidence = Some(0.6);
        let rows = vec![
            row("1", "light", 1, "23:00", "23:20"),
            second,
            row("3", "light", 2, "23:30", "23:40"),
        ];
        let data = HypnogramNormalizer::normalize(&rows).data.unwrap();

        assert_eq!(data.segments.len(), 2);
        assert_eq!(data.segments[0].duration_minutes, 30.0);
        // (0.9 × 20 + 0.6 × 10) / 30
        assert!((data.segments[0].confidence.unwrap() - 0.8).abs() < 1e-9);
        assert_eq!(data.segments[1].cycle_number, Some(2));
    }

    #[test]
    fn test_numeric_ids_and_bad_durations() {
        let json = r#"[
            {"id": 7, "stage": "DEEP", "cycle_number": 1,
             "start_time": "2024-01-15T23:00:00Z", "end_time": "2024-01-15T23:30:00Z"},
            {"id": 8, "stage": "light", "cycle_number": 1, "duration_minutes": -5,
             "start_time": "2024-01-15T23:30:00Z", "end_time": "2024-01-15T23:40:00Z"},
            {"id": 9, "stage": "n5",
             "start_time": "2024-01-15T23:40:00Z", "end_time": "2024-01-15T23:50:00Z"}
        ]"#;
        let rows: Vec<PhaseRow> = serde_json::from_str(json).unwrap();
        let result = HypnogramNormalizer::normalize(&rows);

        assert_eq!(result.dropped_rows, 2);
        let data = result.data.unwrap();
        assert_eq!(data.segments[0].id.as_deref(), Some("7"));
        assert_eq!(data.segments[0].stage, "deep");
    }
}
