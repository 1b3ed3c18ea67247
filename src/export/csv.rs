// Member table CSV (RFC 4180 quoting, UTF-8 with BOM)

use std::borrow::Cow;
use std::path::Path;
use time::format_description;
use time::OffsetDateTime;

use super::errors::ExportError;
use super::models::MemberRow;

pub const UTF8_BOM: &str = "\u{FEFF}";

pub const MEMBER_HEADER: [&str; 5] = ["wxid", "nickname", "remark", "group_nickname", "message_count"];

/// Quote `value` if it contains a comma, quote or line break
pub fn csv_escape(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

fn push_record<'a>(out: &mut String, fields: impl IntoIterator<Item = &'a str>) {
    let line: Vec<Cow<'_, str>> = fields.into_iter().map(csv_escape).collect();
    out.push_str(&line.join(","));
    out.push_str("\r\n");
}

/// Full file contents, BOM included
pub fn render_members_csv(rows: &[MemberRow]) -> String {
    let mut out = String::from(UTF8_BOM);
    push_record(&mut out, MEMBER_HEADER);

    for row in rows {
        let count = row.message_count.to_string();
        push_record(
            &mut out,
            [
                row.wxid.as_str(),
                row.nickname.as_str(),
                row.remark.as_str(),
                row.group_nickname.as_str(),
                count.as_str(),
            ],
        );
    }

    out
}

pub async fn write_members_csv(path: &Path, rows: &[MemberRow]) -> Result<(), ExportError> {
    let contents = render_members_csv(rows);
    tokio::fs::write(path, contents.as_bytes())
        .await
        .map_err(|e| ExportError::Io(format!("Failed to write {}: {}", path.display(), e)))?;
    tracing::info!("[Export] wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}

/// `<prefix>_YYYYMMDD_HHMMSS.csv`
pub fn default_export_file_name(prefix: &str, now: OffsetDateTime) -> String {
    let stamp = format_description::parse("[year][month][day]_[hour][minute][second]")
        .ok()
        .and_then(|fmt| now.format(&fmt).ok())
        .unwrap_or_else(|| now.unix_timestamp().to_string());
    format!("{}_{}.csv", prefix, stamp)
}
