//! Printable labels
//!
//! A print job is one HTML document holding a label per child and a
//! claim ticket per pickup group, separated by page breaks. The document
//! opens the print dialog as soon as it has loaded.

use chrono::NaiveDate;

use crate::models::CheckinDetail;

/// Code size used while the batch holds at most this many codes
pub const LARGE_CODE_MAX_CODES: usize = 2;

const LARGE_CODE_FONT: &str = "28pt";
const SMALL_CODE_FONT: &str = "18pt";

const STYLE: &str = r#"
  @page { size: 4in 2in; margin: 0; }
  body { margin: 0; font-family: Arial, Helvetica, sans-serif; }
  .page { width: 4in; height: 2in; box-sizing: border-box; padding: 0.12in; position: relative; }
  .break { page-break-after: always; break-after: page; }
  .name { font-size: 20pt; font-weight: bold; }
  .code { position: absolute; top: 0.12in; right: 0.15in; font-weight: bold; }
  .location { font-size: 12pt; margin-top: 4pt; }
  .allergy { margin-top: 6pt; padding: 2pt 4pt; background: #000; color: #fff; font-weight: bold; }
  .guest { display: inline-block; margin-left: 6pt; padding: 0 4pt; border: 1px solid #000; font-size: 10pt; }
  .parent { font-size: 10pt; margin-top: 4pt; }
  .ticket-title { font-size: 11pt; text-transform: uppercase; }
  .children { font-size: 12pt; margin-top: 4pt; }
  .date { position: absolute; bottom: 0.12in; right: 0.15in; font-size: 9pt; }
"#;

/// Font size for security codes given how many distinct codes are printed
pub fn code_font_size(distinct_codes: usize) -> &'static str {
    if distinct_codes <= LARGE_CODE_MAX_CODES {
        LARGE_CODE_FONT
    } else {
        SMALL_CODE_FONT
    }
}

/// Escape text for use in HTML content and attribute values
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Pickup groups in first-seen order
fn group_by_code(rows: &[CheckinDetail]) -> Vec<(&str, Vec<&CheckinDetail>)> {
    let mut groups: Vec<(&str, Vec<&CheckinDetail>)> = Vec::new();
    for row in rows {
        let code = row.checkin.security_code.as_str();
        match groups.iter_mut().find(|(c, _)| *c == code) {
            Some((_, members)) => members.push(row),
            None => groups.push((code, vec![row])),
        }
    }
    groups
}

fn child_label(row: &CheckinDetail, code_font: &str) -> String {
    let checkin = &row.checkin;
    let guest_badge = if checkin.is_guest {
        r#"<span class="guest">GUEST</span>"#
    } else {
        ""
    };

    let location = match &row.room_number {
        Some(room) if !room.is_empty() => format!(
            "{} &middot; Room {}",
            escape_html(&row.location_name),
            escape_html(room)
        ),
        _ => escape_html(&row.location_name),
    };

    let allergy = row
        .allergies
        .as_deref()
        .filter(|a| !a.trim().is_empty())
        .map(|a| format!(r#"<div class="allergy">ALLERGY: {}</div>"#, escape_html(a)))
        .unwrap_or_default();

    let parent = if checkin.is_guest {
        format!(
            r#"<div class="parent">Parent: {} &middot; {}</div>"#,
            escape_html(checkin.guest_parent_name.as_deref().unwrap_or_default()),
            escape_html(checkin.guest_parent_phone.as_deref().unwrap_or_default())
        )
    } else {
        String::new()
    };

    format!(
        r#"<div class="name">{}{}</div><div class="code" style="font-size: {}">{}</div><div class="location">{}</div>{}{}"#,
        escape_html(&row.display_name),
        guest_badge,
        code_font,
        escape_html(&checkin.security_code),
        location,
        allergy,
        parent
    )
}

fn claim_ticket(code: &str, members: &[&CheckinDetail], date: NaiveDate, code_font: &str) -> String {
    let names = members
        .iter()
        .map(|m| escape_html(&m.display_name))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"<div class="ticket-title">Parent pickup ticket</div><div class="code" style="font-size: {}">{}</div><div class="children">{}</div><div class="date">{}</div>"#,
        code_font,
        escape_html(code),
        names,
        date.format("%Y-%m-%d")
    )
}

/// Render child labels and claim tickets for `rows` as one print job
pub fn render_print_job(rows: &[CheckinDetail], date: NaiveDate) -> String {
    let groups = group_by_code(rows);
    let code_font = code_font_size(groups.len());

    let mut pages: Vec<String> = rows.iter().map(|row| child_label(row, code_font)).collect();
    pages.extend(
        groups
            .iter()
            .map(|(code, members)| claim_ticket(code, members, date, code_font)),
    );

    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str("<title>Check-in labels</title>\n<style>");
    html.push_str(STYLE);
    html.push_str("</style>\n</head>\n<body onload=\"window.print()\">\n");

    let last = pages.len().saturating_sub(1);
    for (i, page) in pages.iter().enumerate() {
        let class = if i < last { "page break" } else { "page" };
        html.push_str(&format!("<div class=\"{}\">{}</div>\n", class, page));
    }

    html.push_str("</body>\n</html>\n");
    html
}
