//! Rewrites one embedded manifest into the aggregate index, injecting the
//! computed fields into its metadata extension.

use std::io::Write;

use addonsync_schema::manifest::{LEGACY_METADATA_POINT, METADATA_POINT};
use addonsync_schema::Manifest;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use super::IndexError;

/// Fields appended to the metadata extension of an index entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComputedFields {
    /// Names of the `no<stem>` flags to emit, e.g. `noicon`.
    pub missing: Vec<String>,
    /// Archive size in bytes.
    pub size: u64,
    /// Archive path relative to the published root, `/`-separated.
    pub path: String,
}

impl ComputedFields {
    fn write<W: Write>(&self, writer: &mut Writer<W>) -> Result<(), IndexError> {
        for flag in &self.missing {
            text_element(writer, flag, "true")?;
        }
        text_element(writer, "size", &self.size.to_string())?;
        text_element(writer, "path", &self.path)?;
        Ok(())
    }
}

fn text_element<W: Write>(writer: &mut Writer<W>, name: &str, text: &str) -> Result<(), IndexError> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

/// Copy the `<addon>` element of `source` into `writer`, appending `fields`
/// to its metadata extension.
///
/// The current metadata point is preferred over the legacy one. A manifest
/// without either gets a synthesized `kodi.addon.metadata` extension.
/// Declarations, doctypes and processing instructions are dropped.
pub fn write_entry<W: Write>(
    writer: &mut Writer<W>,
    source: &[u8],
    manifest: &Manifest,
    fields: &ComputedFields,
) -> Result<(), IndexError> {
    let target_point = [METADATA_POINT, LEGACY_METADATA_POINT]
        .into_iter()
        .find(|p| manifest.extension_points.iter().any(|e| e == p));

    let mut reader = Reader::from_reader(source);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut depth = 0usize;
    // Depth of the open metadata extension we are writing into.
    let mut inside_target: Option<usize> = None;
    let mut injected = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                depth += 1;
                if depth == 2 && !injected && is_point(&e, target_point)? {
                    inside_target = Some(depth);
                }
                writer.write_event(Event::Start(e))?;
            }
            Event::Empty(e) => {
                if depth == 0 {
                    // `<addon .../>`
                    writer.write_event(Event::Start(e.borrow()))?;
                    synthesize(writer, fields)?;
                    writer.write_event(Event::End(e.to_end()))?;
                    injected = true;
                } else if depth == 1 && !injected && is_point(&e, target_point)? {
                    writer.write_event(Event::Start(e.borrow()))?;
                    fields.write(writer)?;
                    writer.write_event(Event::End(e.to_end()))?;
                    injected = true;
                } else {
                    writer.write_event(Event::Empty(e))?;
                }
            }
            Event::End(e) => {
                if inside_target == Some(depth) {
                    fields.write(writer)?;
                    inside_target = None;
                    injected = true;
                }
                if depth == 1 && !injected {
                    synthesize(writer, fields)?;
                    injected = true;
                }
                depth = depth.saturating_sub(1);
                writer.write_event(Event::End(e))?;
            }
            Event::Text(e) => writer.write_event(Event::Text(e))?,
            Event::CData(e) => writer.write_event(Event::CData(e))?,
            Event::Comment(e) => {
                if depth > 0 {
                    writer.write_event(Event::Comment(e))?;
                }
            }
            Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {}
            Event::Eof => break,
        }
        buf.clear();
    }
    Ok(())
}

fn is_point(e: &BytesStart<'_>, point: Option<&str>) -> Result<bool, IndexError> {
    let Some(point) = point else {
        return Ok(false);
    };
    if e.local_name().as_ref() != b"extension" {
        return Ok(false);
    }
    match e.try_get_attribute("point")? {
        Some(attr) => Ok(attr.unescape_value()? == point),
        None => Ok(false),
    }
}

fn synthesize<W: Write>(writer: &mut Writer<W>, fields: &ComputedFields) -> Result<(), IndexError> {
    let mut start = BytesStart::new("extension");
    start.push_attribute(("point", METADATA_POINT));
    writer.write_event(Event::Start(start))?;
    fields.write(writer)?;
    writer.write_event(Event::End(BytesEnd::new("extension")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(xml: &str, fields: &ComputedFields) -> String {
        let manifest = Manifest::parse(xml.as_bytes()).unwrap();
        let mut writer = Writer::new(Vec::new());
        write_entry(&mut writer, xml.as_bytes(), &manifest, fields).unwrap();
        String::from_utf8(writer.into_inner()).unwrap()
    }

    fn fields(missing: &[&str]) -> ComputedFields {
        ComputedFields {
            missing: missing.iter().map(ToString::to_string).collect(),
            size: 1234,
            path: "plugin.x/plugin.x-1.0.zip".to_string(),
        }
    }

    #[test]
    fn test_injects_into_metadata_extension() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<addon id="plugin.x" version="1.0">
  <extension point="xbmc.python.pluginsource" library="main.py"/>
  <extension point="xbmc.addon.metadata">
    <summary lang="en_GB">Example &amp; more</summary>
  </extension>
</addon>"#;
        let out = render(xml, &fields(&["nofanart"]));
        assert_eq!(
            out,
            concat!(
                r#"<addon id="plugin.x" version="1.0">"#,
                r#"<extension point="xbmc.python.pluginsource" library="main.py"/>"#,
                r#"<extension point="xbmc.addon.metadata">"#,
                r#"<summary lang="en_GB">Example &amp; more</summary>"#,
                "<nofanart>true</nofanart><size>1234</size><path>plugin.x/plugin.x-1.0.zip</path>",
                "</extension></addon>"
            )
        );
    }

    #[test]
    fn test_current_point_preferred_over_legacy() {
        let xml = r#"<addon id="plugin.x" version="1.0">
<extension point="xbmc.addon.metadata"><summary>old</summary></extension>
<extension point="kodi.addon.metadata"/>
</addon>"#;
        let out = render(xml, &fields(&[]));
        assert!(out.contains("<summary>old</summary></extension>"));
        assert!(out.contains(
            r#"<extension point="kodi.addon.metadata"><size>1234</size><path>plugin.x/plugin.x-1.0.zip</path></extension>"#
        ));
    }

    #[test]
    fn test_metadata_extension_synthesized() {
        let xml = r#"<addon id="plugin.x" version="1.0"><requires><import addon="xbmc.python" version="3.0.0"/></requires></addon>"#;
        let out = render(xml, &fields(&["noicon"]));
        assert!(out.ends_with(
            r#"<extension point="kodi.addon.metadata"><noicon>true</noicon><size>1234</size><path>plugin.x/plugin.x-1.0.zip</path></extension></addon>"#
        ));
    }

    #[test]
    fn test_empty_root_element() {
        let out = render(r#"<addon id="plugin.x" version="1.0"/>"#, &fields(&[]));
        assert!(out.starts_with(r#"<addon id="plugin.x" version="1.0"><extension"#));
        assert!(out.ends_with("</extension></addon>"));
    }

    #[test]
    fn test_nested_extension_is_not_a_target() {
        let xml = r#"<addon id="plugin.x" version="1.0">
<extension point="xbmc.python.pluginsource"><extension point="kodi.addon.metadata"/></extension>
</addon>"#;
        let out = render(xml, &fields(&[]));
        assert!(out.contains(r#"<extension point="kodi.addon.metadata"/></extension>"#));
        assert_eq!(out.matches("<size>").count(), 1);
    }
}
