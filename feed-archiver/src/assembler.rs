use crate::config::{AttributionPolicy, FeedTarget};
use crate::rss_utils::text::strip_xml_invalid;
use crate::types::{FeedError, Item, Result};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Write;

pub const GENERATOR: &str = concat!("feed-archiver ", env!("CARGO_PKG_VERSION"));
/// `domain` attribute of the `<category>` element carrying attribution.
pub const ATTRIBUTION_DOMAIN: &str = "source";

struct Channel<'a> {
    title: String,
    link: &'a str,
    description: String,
}

/// Renders the active feed. Output depends only on the inputs, so re-assembling an
/// unchanged set differs only in `lastBuildDate`.
pub fn assemble(items: &[Item], target: &FeedTarget, built_at: DateTime<Utc>) -> Result<Vec<u8>> {
    let channel = Channel {
        title: target.title.clone(),
        link: &target.link,
        description: target.description.clone(),
    };
    render(&channel, items, target.source_attribution, built_at)
}

pub fn assemble_archive(items: &[Item], target: &FeedTarget, built_at: DateTime<Utc>) -> Result<Vec<u8>> {
    let channel = Channel {
        title: format!("{} (Archive)", target.title),
        link: &target.link,
        description: format!("Archived items from {}", target.title),
    };
    render(&channel, items, target.source_attribution, built_at)
}

fn attribution_suffix(attribution: &str) -> String {
    format!("(via {})", attribution)
}

pub fn decorate(text: &str, attribution: &str) -> String {
    if text.is_empty() {
        attribution_suffix(attribution)
    } else {
        format!("{} {}", text, attribution_suffix(attribution))
    }
}

/// Inverse of [`decorate`], applied when reading a previously written feed.
pub fn strip_decoration(text: &str, attribution: &str) -> String {
    let suffix = attribution_suffix(attribution);
    match text.strip_suffix(&suffix) {
        Some(rest) => rest.trim_end().to_string(),
        None => text.to_string(),
    }
}

/// Title and description as they appear in the document.
pub fn display_fields(item: &Item, policy: AttributionPolicy) -> (String, String) {
    match (policy, item.attribution.as_deref()) {
        (AttributionPolicy::Title, Some(attr)) => (decorate(&item.title, attr), item.description.clone()),
        (AttributionPolicy::Description, Some(attr)) => {
            (item.title.clone(), decorate(&item.description, attr))
        }
        _ => (item.title.clone(), item.description.clone()),
    }
}

fn render_err(e: impl std::fmt::Display) -> FeedError {
    FeedError::Render(e.to_string())
}

fn write_text_element<W: Write>(w: &mut Writer<W>, name: &str, text: &str) -> Result<()> {
    w.write_event(Event::Start(BytesStart::new(name))).map_err(render_err)?;
    let clean = strip_xml_invalid(text);
    w.write_event(Event::Text(BytesText::new(&clean))).map_err(render_err)?;
    w.write_event(Event::End(BytesEnd::new(name))).map_err(render_err)?;
    Ok(())
}

fn render(
    channel: &Channel<'_>,
    items: &[Item],
    policy: AttributionPolicy,
    built_at: DateTime<Utc>,
) -> Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(render_err)?;

    let mut rss_start = BytesStart::new("rss");
    rss_start.push_attribute(("version", "2.0"));
    writer.write_event(Event::Start(rss_start)).map_err(render_err)?;
    writer
        .write_event(Event::Start(BytesStart::new("channel")))
        .map_err(render_err)?;

    write_text_element(&mut writer, "title", &channel.title)?;
    write_text_element(&mut writer, "link", channel.link)?;
    write_text_element(&mut writer, "description", &channel.description)?;
    write_text_element(&mut writer, "language", "en")?;
    write_text_element(&mut writer, "lastBuildDate", &built_at.to_rfc2822())?;
    write_text_element(&mut writer, "generator", GENERATOR)?;

    for item in items {
        let (title, description) = display_fields(item, policy);

        writer
            .write_event(Event::Start(BytesStart::new("item")))
            .map_err(render_err)?;
        write_text_element(&mut writer, "title", &title)?;
        write_text_element(&mut writer, "link", &item.link)?;
        write_text_element(&mut writer, "description", &description)?;

        let mut guid = BytesStart::new("guid");
        guid.push_attribute(("isPermaLink", if item.id == item.link { "true" } else { "false" }));
        writer.write_event(Event::Start(guid)).map_err(render_err)?;
        writer
            .write_event(Event::Text(BytesText::new(&strip_xml_invalid(&item.id))))
            .map_err(render_err)?;
        writer.write_event(Event::End(BytesEnd::new("guid"))).map_err(render_err)?;

        write_text_element(&mut writer, "pubDate", &item.published_at.to_rfc2822())?;

        if let Some(attribution) = &item.attribution {
            let mut category = BytesStart::new("category");
            category.push_attribute(("domain", ATTRIBUTION_DOMAIN));
            writer.write_event(Event::Start(category)).map_err(render_err)?;
            writer
                .write_event(Event::Text(BytesText::new(&strip_xml_invalid(attribution))))
                .map_err(render_err)?;
            writer
                .write_event(Event::End(BytesEnd::new("category")))
                .map_err(render_err)?;
        }

        writer
            .write_event(Event::End(BytesEnd::new("item")))
            .map_err(render_err)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("channel")))
        .map_err(render_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("rss")))
        .map_err(render_err)?;

    let mut out = writer.into_inner();
    out.push(b'\n');
    Ok(out)
}
