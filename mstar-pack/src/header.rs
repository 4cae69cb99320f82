//! Header script: the bootloader commands stored at the start of the image
//!
//! The script is plain text terminated by [`END_OF_SCRIPT`] and padded with
//! `0xFF` to the manifest's header size.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};

use crate::error::{PackError, Result};

/// Last line of every header script
pub const END_OF_SCRIPT: &str = "% <- this is end of file symbol";

pub const HEADER_FILL: u8 = 0xFF;

/// Format used for a bare `{time}` placeholder
pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const DEFAULT_LABEL: &str = "#-------------USB Upgrade Bin Info----------------\n\
                             # Build TIME : {time}\n\
                             # Build TIME STAMP : {timestamp}";

/// Header text under construction
#[derive(Debug, Clone)]
pub struct HeaderImage {
    capacity: usize,
    text: String,
}

impl HeaderImage {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            text: String::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn push_str(&mut self, s: &str) {
        self.text.push_str(s);
    }

    /// Label block, or the stock "USB Upgrade Bin Info" banner without one
    pub fn write_label(&mut self, label: Option<&str>, time: &DateTime<Utc>) -> Result<()> {
        let rendered = render_label(label.unwrap_or(DEFAULT_LABEL), time)?;
        self.text.push_str(&rendered);
        self.text.push_str("\n\n");
        Ok(())
    }

    pub fn write_prefix(&mut self, prefix: &str) {
        self.text.push_str("# File Partition: set_partition\n");
        self.push_block(prefix);
        self.text.push('\n');
    }

    pub fn write_partition_comment(&mut self, name: &str) {
        self.text.push_str(&format!("\n# File Partition: {name}\n"));
    }

    pub fn write_suffix(&mut self, suffix: &str) {
        self.text.push_str("\n# File Partition: set_config\n");
        self.push_block(suffix);
    }

    fn push_block(&mut self, block: &str) {
        self.text.push_str(block);
        if !block.is_empty() && !block.ends_with('\n') {
            self.text.push('\n');
        }
    }

    /// Terminate the script and pad it to exactly `capacity` bytes
    pub fn finish(mut self) -> Result<Vec<u8>> {
        self.text.push_str(END_OF_SCRIPT);
        self.text.push('\n');

        if self.text.len() > self.capacity {
            return Err(PackError::config(format!(
                "header script is {} bytes, larger than the {} byte header",
                self.text.len(),
                self.capacity
            )));
        }

        let mut bytes = self.text.into_bytes();
        bytes.resize(self.capacity, HEADER_FILL);
        Ok(bytes)
    }
}

/// Expand `{time}`, `{time:<strftime>}` and `{timestamp}` in a label
///
/// `{{` and `}}` produce literal braces and `\#` becomes `#`.
pub fn render_label(template: &str, time: &DateTime<Utc>) -> Result<String> {
    let template = template.replace("\\#", "#");
    let mut out = String::with_capacity(template.len());
    let mut rest = template.as_str();

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if let Some(after) = tail.strip_prefix("{{") {
            out.push('{');
            rest = after;
            continue;
        }
        if let Some(after) = tail.strip_prefix("}}") {
            out.push('}');
            rest = after;
            continue;
        }
        if tail.starts_with('}') {
            return Err(PackError::config("label has an unmatched '}'"));
        }

        let end = tail
            .find('}')
            .ok_or_else(|| PackError::config("label has an unterminated placeholder"))?;
        let field = &tail[1..end];
        match field.split_once(':') {
            None if field == "time" => out.push_str(&format_time(time, DEFAULT_TIME_FORMAT)?),
            None if field == "timestamp" => out.push_str(&time.timestamp().to_string()),
            Some(("time", fmt)) => out.push_str(&format_time(time, fmt)?),
            _ => {
                return Err(PackError::config(format!(
                    "unknown label placeholder '{{{field}}}'"
                )));
            }
        }
        rest = &tail[end + 1..];
    }
    out.push_str(rest);

    Ok(out)
}

fn format_time(time: &DateTime<Utc>, fmt: &str) -> Result<String> {
    let items: Vec<Item> = StrftimeItems::new(fmt).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(PackError::config(format!("invalid time format '{fmt}'")));
    }
    Ok(time.format_with_items(items.iter()).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn build_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    #[test]
    fn test_render_placeholders() {
        let time = build_time();
        assert_eq!(
            render_label("Built {time} ({timestamp})", &time).unwrap(),
            "Built 2024-03-09 14:05:07 (1709993107)"
        );
        assert_eq!(render_label("{time:%d/%m/%Y}", &time).unwrap(), "09/03/2024");
        assert_eq!(render_label("\\# {{raw}}", &time).unwrap(), "# {raw}");
    }

    #[test]
    fn test_render_rejects_bad_placeholders() {
        let time = build_time();
        assert!(render_label("{version}", &time).unwrap_err().is_config());
        assert!(render_label("{time", &time).is_err());
        assert!(render_label("oops }", &time).is_err());
        assert!(render_label("{time:%Q}", &time).is_err());
    }

    #[test]
    fn test_layout() {
        let mut header = HeaderImage::new(1024);
        header.write_label(Some("# test"), &build_time()).unwrap();
        header.write_prefix("mmc rmgpt");
        header.write_partition_comment("boot");
        header.push_str("mmc erase.p boot\n");
        header.write_suffix("reset");

        assert_eq!(
            header.text(),
            "# test\n\n\
             # File Partition: set_partition\nmmc rmgpt\n\n\
             \n# File Partition: boot\nmmc erase.p boot\n\
             \n# File Partition: set_config\nreset\n"
        );

        let bytes = header.finish().unwrap();
        assert_eq!(bytes.len(), 1024);
        let text_end = bytes.iter().position(|b| *b == HEADER_FILL).unwrap();
        let text = std::str::from_utf8(&bytes[..text_end]).unwrap();
        assert!(text.ends_with("% <- this is end of file symbol\n"));
        assert!(bytes[text_end..].iter().all(|b| *b == HEADER_FILL));
    }

    #[test]
    fn test_default_label() {
        let mut header = HeaderImage::new(256);
        header.write_label(None, &build_time()).unwrap();
        assert_eq!(
            header.text(),
            "#-------------USB Upgrade Bin Info----------------\n\
             # Build TIME : 2024-03-09 14:05:07\n\
             # Build TIME STAMP : 1709993107\n\n"
        );
    }

    #[test]
    fn test_exact_fit_and_overflow() {
        let sentinel_len = END_OF_SCRIPT.len() + 1;

        let exact = HeaderImage::new(sentinel_len);
        assert_eq!(exact.finish().unwrap().len(), sentinel_len);

        let mut overflow = HeaderImage::new(sentinel_len);
        overflow.push_str("x");
        let err = overflow.finish().unwrap_err();
        assert!(err.is_config());
    }
}
