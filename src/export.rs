//! POA&M CSV export

use crate::storage::PoamMeta;

/// Column headers, matching the layout auditors expect
const POAM_HEADERS: [&str; 14] = [
    "POA&M ID",
    "POA&M Group",
    "Weakness Name",
    "Controls",
    "Description",
    "Status",
    "Risk Rating Original",
    "Risk Rating Adjusted",
    "Weakness Detection Source",
    "Weakness Source Identifier",
    "Remediation Plan",
    "Milestones",
    "Milestone Changes",
    "Scheduled Completion Date",
];

/// Render a system's POA&Ms as CSV. The id column carries the "V-" prefix
/// used in submitted POA&M spreadsheets.
pub fn poams_to_csv(poams: &[PoamMeta]) -> String {
    let mut out = String::new();
    write_row(&mut out, POAM_HEADERS.iter().map(|h| h.to_string()));

    for poam in poams {
        let d = &poam.details;
        write_row(
            &mut out,
            [
                format!("V-{}", poam.poam_id),
                d.poam_group.clone().unwrap_or_default(),
                d.weakness_name.clone().unwrap_or_default(),
                d.controls.clone().unwrap_or_default(),
                poam.body.clone(),
                poam.status.clone().unwrap_or_default(),
                d.risk_rating_original.clone().unwrap_or_default(),
                d.risk_rating_adjusted.clone().unwrap_or_default(),
                d.weakness_detection_source.clone().unwrap_or_default(),
                d.weakness_source_identifier.clone().unwrap_or_default(),
                d.remediation_plan.clone().unwrap_or_default(),
                d.milestones.clone().unwrap_or_default(),
                d.milestone_changes.clone().unwrap_or_default(),
                d.scheduled_completion_date.clone().unwrap_or_default(),
            ]
            .into_iter(),
        );
    }
    out
}

/// Filename for a POA&M export, derived from the system name
pub fn poam_export_filename(system_name: &str, system_id: i64) -> String {
    let stamp = chrono::Utc::now().format("%Y-%m-%d-%H-%M");
    format!(
        "{}_{}_poam_export-{}.csv",
        system_name.replace(' ', "_"),
        system_id,
        stamp
    )
}

fn write_row(out: &mut String, fields: impl Iterator<Item = String>) {
    let mut first = true;
    for field in fields {
        if !first {
            out.push(',');
        }
        first = false;
        out.push_str(&escape_field(&field));
    }
    out.push_str("\r\n");
}

/// RFC 4180 quoting: fields containing commas, quotes, or newlines are
/// wrapped in double quotes with embedded quotes doubled
fn escape_field(field: &str) -> String {
    if field.contains(['"', ',', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
