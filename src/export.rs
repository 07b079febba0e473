use crate::marks::Scale;
use crate::records::{CopyRecord, EvaluationRecord, MemberRecord};
use anyhow::Context;
use rust_xlsxwriter::{Format, Workbook, Worksheet};
use serde::Serialize;
use std::path::Path;

/// A flat table: one row per student, numeric cells left empty when unknown.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSheet {
    pub title: String,
    pub headers: Vec<String>,
    pub rows: Vec<ExportRow>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRow {
    pub last_name: String,
    pub first_name: String,
    pub cells: Vec<Option<f64>>,
}

fn fmt_points(x: f64) -> String {
    if x.fract() == 0.0 {
        format!("{}", x as i64)
    } else {
        format!("{}", x)
    }
}

pub fn evaluation_headers(scale: &Scale, mark_scale: f64) -> Vec<String> {
    let mut headers = vec!["Nom".to_string(), "Prénom".to_string()];
    for cat in &scale.categories {
        headers.push(format!("{} (/{})", cat.name, fmt_points(cat.max_points())));
        for crit in &cat.criteria {
            headers.push(format!(
                "{} - {} (/{})",
                cat.name,
                crit.label,
                fmt_points(crit.max_points)
            ));
        }
    }
    headers.push("Bonus".to_string());
    headers.push("Malus".to_string());
    headers.push(format!("Total (/{})", fmt_points(scale.total_points())));
    headers.push(format!("Note (/{})", fmt_points(mark_scale)));
    headers
}

/// Flattens a copy along the scale: each category total followed by its criteria.
pub fn flatten_copy(scale: &Scale, copy: Option<&CopyRecord>) -> Vec<Option<f64>> {
    let mut cells = Vec::with_capacity(scale.categories.len() + scale.criteria_count() + 4);
    for cat in &scale.categories {
        let crit_points: Vec<Option<f64>> = cat
            .criteria
            .iter()
            .map(|crit| copy.map(|c| c.points.get(&crit.id).copied().unwrap_or(0.0)))
            .collect();
        cells.push(copy.map(|_| crit_points.iter().flatten().sum()));
        cells.extend(crit_points);
    }
    cells.push(copy.map(|c| c.bonus));
    cells.push(copy.map(|c| c.penalty));
    cells.push(copy.map(|c| c.total_points));
    cells.push(copy.map(|c| c.mark));
    cells
}

pub fn evaluation_sheet(
    evaluation: &EvaluationRecord,
    scale: &Scale,
    members: &[MemberRecord],
    copies: &[CopyRecord],
) -> ExportSheet {
    // Roster order; students without a copy are left out.
    let rows = members
        .iter()
        .filter_map(|m| {
            let copy = copies.iter().find(|c| c.student_id == m.student.id)?;
            Some(ExportRow {
                last_name: m.student.last_name.clone(),
                first_name: m.student.first_name.clone(),
                cells: flatten_copy(scale, Some(copy)),
            })
        })
        .collect();
    ExportSheet {
        title: evaluation.title.clone(),
        headers: evaluation_headers(scale, evaluation.mark_scale),
        rows,
    }
}

/// One column per evaluation (its mark) then the student's running average out of 20.
pub fn group_sheet(
    group_name: &str,
    evaluations: &[EvaluationRecord],
    members: &[MemberRecord],
    marks: &[(String, String, f64)],
) -> ExportSheet {
    let mut headers = vec!["Nom".to_string(), "Prénom".to_string()];
    for e in evaluations {
        headers.push(format!(
            "{} (/{}, coef. {})",
            e.title,
            fmt_points(e.mark_scale),
            fmt_points(e.coefficient)
        ));
    }
    headers.push("Moyenne (/20)".to_string());

    let rows = members
        .iter()
        .map(|m| {
            let mut cells: Vec<Option<f64>> = evaluations
                .iter()
                .map(|e| {
                    marks
                        .iter()
                        .find(|(eid, sid, _)| eid == &e.id && sid == &m.student.id)
                        .map(|(_, _, mark)| *mark)
                })
                .collect();
            cells.push(m.average.map(|a| crate::marks::round_to_precision(a, 0.01)));
            ExportRow {
                last_name: m.student.last_name.clone(),
                first_name: m.student.first_name.clone(),
                cells,
            }
        })
        .collect();

    ExportSheet {
        title: group_name.to_string(),
        headers,
        rows,
    }
}

/// Excel sheet names are limited to 31 characters and a restricted charset.
fn sheet_name(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '[' | ']' | ':' | '*' | '?' | '/' | '\\' => ' ',
            other => other,
        })
        .collect();
    let trimmed: String = cleaned.trim().trim_matches('\'').chars().take(31).collect();
    if trimmed.trim().is_empty() {
        "Notes".to_string()
    } else {
        trimmed
    }
}

pub fn to_xlsx(sheet: &ExportSheet) -> anyhow::Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();
    worksheet
        .set_name(sheet_name(&sheet.title))
        .context("invalid worksheet name")?;

    let bold = Format::new().set_bold();
    for (col, header) in sheet.headers.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, header, &bold)?;
    }
    for (i, row) in sheet.rows.iter().enumerate() {
        let r = (i + 1) as u32;
        worksheet.write_string(r, 0, &row.last_name)?;
        worksheet.write_string(r, 1, &row.first_name)?;
        for (j, cell) in row.cells.iter().enumerate() {
            if let Some(v) = cell {
                worksheet.write_number(r, (j + 2) as u16, *v)?;
            }
        }
    }

    workbook.push_worksheet(worksheet);
    let buffer = workbook.save_to_buffer()?;
    Ok(buffer)
}

pub fn write_xlsx(sheet: &ExportSheet, out_path: &Path) -> anyhow::Result<usize> {
    let bytes = to_xlsx(sheet)?;
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    std::fs::write(out_path, &bytes)
        .with_context(|| format!("failed to write {}", out_path.to_string_lossy()))?;
    Ok(bytes.len())
}
