//! Tellico XML output
//!
//! Builds the fixed-schema document the cataloging application imports:
//! an XML declaration and DTD doctype, a `<tellico>` root, one
//! `<collection>` holding field declarations and entries, and a trailing
//! `<images>` list of base64 payloads.
//!
//! Convention for absent data: an empty field is omitted from its entry.
//! This holds uniformly for every field of every source, so a given field
//! is either always present-with-content or always absent across runs.

use crate::image::CoverImage;
use crate::Result;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;

const DOCTYPE: &str = r#"tellico PUBLIC "-//Robby Stephenson/DTD Tellico V9.0//EN" "http://periapsis.org/tellico/dtd/v9/tellico.dtd""#;
const NAMESPACE: &str = "http://periapsis.org/tellico/";
const SYNTAX_VERSION: &str = "9";

/// The collection types used by the sources in this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    Books,
    Movies,
    Comics,
}

impl CollectionKind {
    fn type_code(self) -> &'static str {
        match self {
            CollectionKind::Books => "2",
            CollectionKind::Movies => "3",
            CollectionKind::Comics => "6",
        }
    }
}

/// A custom `<field>` declaration
#[derive(Debug, Clone, Default)]
pub struct FieldDef {
    name: String,
    title: String,
    flags: String,
    category: String,
    format: String,
    kind: String,
    description: Option<String>,
    allowed: Option<String>,
    i18n: bool,
    props: Vec<(String, String)>,
}

impl FieldDef {
    pub fn new(
        name: &str,
        title: &str,
        flags: &str,
        category: &str,
        format: &str,
        kind: &str,
    ) -> Self {
        FieldDef {
            name: name.to_string(),
            title: title.to_string(),
            flags: flags.to_string(),
            category: category.to_string(),
            format: format.to_string(),
            kind: kind.to_string(),
            description: None,
            allowed: None,
            i18n: false,
            props: Vec::new(),
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn allowed(mut self, allowed: &str) -> Self {
        self.allowed = Some(allowed.to_string());
        self
    }

    pub fn i18n(mut self) -> Self {
        self.i18n = true;
        self
    }

    pub fn prop(mut self, name: &str, value: &str) -> Self {
        self.props.push((name.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug, Clone)]
enum EntryField {
    Single {
        name: String,
        value: String,
    },
    Multi {
        parent: String,
        child: String,
        values: Vec<String>,
    },
    /// Multi-valued field whose values are `<column>` rows (cast lists)
    Table {
        parent: String,
        child: String,
        rows: Vec<Vec<String>>,
    },
}

/// One catalog entry under construction. Empty values never make it in.
#[derive(Debug, Clone, Default)]
pub struct Entry {
    id: Option<String>,
    fields: Vec<EntryField>,
}

impl Entry {
    pub fn new() -> Self {
        Entry::default()
    }

    /// Overrides the sequential entry id (used when the source has its own)
    pub fn set_id(&mut self, id: &str) {
        self.id = Some(id.to_string());
    }

    pub fn field(&mut self, name: &str, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        self.fields.push(EntryField::Single {
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    /// Boolean presence field; written as `true` when set, omitted otherwise
    pub fn flag(&mut self, name: &str, set: bool) {
        if set {
            self.field(name, "true");
        }
    }

    pub fn list(&mut self, parent: &str, child: &str, values: &[String]) {
        let values: Vec<String> = values
            .iter()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        if values.is_empty() {
            return;
        }
        self.fields.push(EntryField::Multi {
            parent: parent.to_string(),
            child: child.to_string(),
            values,
        });
    }

    pub fn table(&mut self, parent: &str, child: &str, rows: &[Vec<String>]) {
        let rows: Vec<Vec<String>> = rows
            .iter()
            .map(|row| row.iter().map(|c| c.trim().to_string()).collect())
            .filter(|row: &Vec<String>| row.iter().any(|c| !c.is_empty()))
            .collect();
        if rows.is_empty() {
            return;
        }
        self.fields.push(EntryField::Table {
            parent: parent.to_string(),
            child: child.to_string(),
            rows,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Debug, Clone)]
struct ImageRecord {
    id: String,
    data: String,
    width: Option<u32>,
    height: Option<u32>,
}

/// The whole output document
#[derive(Debug)]
pub struct TellicoDoc {
    kind: CollectionKind,
    title: String,
    fields: Vec<FieldDef>,
    entries: Vec<Entry>,
    images: Vec<ImageRecord>,
}

impl TellicoDoc {
    pub fn new(kind: CollectionKind, title: &str) -> Self {
        TellicoDoc {
            kind,
            title: title.to_string(),
            fields: Vec::new(),
            entries: Vec::new(),
            images: Vec::new(),
        }
    }

    pub fn add_field(&mut self, def: FieldDef) {
        self.fields.push(def);
    }

    pub fn add_entry(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Registers an image payload and returns the id to reference it by
    pub fn add_image(&mut self, image: CoverImage) -> String {
        self.add_image_record(image, None, None)
    }

    /// Same, with fixed display dimensions
    pub fn add_image_sized(&mut self, image: CoverImage, width: u32, height: u32) -> String {
        self.add_image_record(image, Some(width), Some(height))
    }

    fn add_image_record(
        &mut self,
        image: CoverImage,
        width: Option<u32>,
        height: Option<u32>,
    ) -> String {
        let id = image.id.clone();
        self.images.push(ImageRecord {
            id: image.id,
            data: image.data,
            width,
            height,
        });
        id
    }

    /// Renders the document as XML text
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - The serialized document, declaration and doctype
    ///   included
    /// * `Err(BibError)` - The writer failed (out of memory, in practice)
    pub fn render(&self) -> Result<String> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));

        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        writer.write_event(Event::Text(BytesText::from_escaped("\n")))?;
        writer.write_event(Event::DocType(BytesText::from_escaped(DOCTYPE)))?;
        writer.write_event(Event::Text(BytesText::from_escaped("\n")))?;

        let mut root = BytesStart::new("tellico");
        root.push_attribute(("xmlns", NAMESPACE));
        root.push_attribute(("syntaxVersion", SYNTAX_VERSION));
        writer.write_event(Event::Start(root))?;

        let mut collection = BytesStart::new("collection");
        collection.push_attribute(("title", self.title.as_str()));
        collection.push_attribute(("type", self.kind.type_code()));
        writer.write_event(Event::Start(collection))?;

        self.write_fields(&mut writer)?;
        for (index, entry) in self.entries.iter().enumerate() {
            write_entry(&mut writer, entry, index)?;
        }
        self.write_images(&mut writer)?;

        writer.write_event(Event::End(BytesEnd::new("collection")))?;
        writer.write_event(Event::End(BytesEnd::new("tellico")))?;

        Ok(String::from_utf8(writer.into_inner().into_inner())?)
    }

    /// Renders and prints to stdout
    pub fn print(&self) -> Result<()> {
        println!("{}", self.render()?);
        Ok(())
    }

    fn write_fields(&self, writer: &mut Writer<Cursor<Vec<u8>>>) -> Result<()> {
        writer.write_event(Event::Start(BytesStart::new("fields")))?;

        // The standard fields of the collection type
        let mut default = BytesStart::new("field");
        default.push_attribute(("name", "_default"));
        writer.write_event(Event::Empty(default))?;

        for def in &self.fields {
            let mut field = BytesStart::new("field");
            field.push_attribute(("name", def.name.as_str()));
            field.push_attribute(("title", def.title.as_str()));
            field.push_attribute(("flags", def.flags.as_str()));
            field.push_attribute(("category", def.category.as_str()));
            field.push_attribute(("format", def.format.as_str()));
            field.push_attribute(("type", def.kind.as_str()));
            if let Some(description) = &def.description {
                field.push_attribute(("description", description.as_str()));
            }
            if let Some(allowed) = &def.allowed {
                field.push_attribute(("allowed", allowed.as_str()));
            }
            if def.i18n {
                field.push_attribute(("i18n", "yes"));
            }
            if def.props.is_empty() {
                writer.write_event(Event::Empty(field))?;
            } else {
                writer.write_event(Event::Start(field))?;
                for (name, value) in &def.props {
                    let mut prop = BytesStart::new("prop");
                    prop.push_attribute(("name", name.as_str()));
                    writer.write_event(Event::Start(prop))?;
                    writer.write_event(Event::Text(BytesText::new(value)))?;
                    writer.write_event(Event::End(BytesEnd::new("prop")))?;
                }
                writer.write_event(Event::End(BytesEnd::new("field")))?;
            }
        }

        writer.write_event(Event::End(BytesEnd::new("fields")))?;
        Ok(())
    }

    fn write_images(&self, writer: &mut Writer<Cursor<Vec<u8>>>) -> Result<()> {
        writer.write_event(Event::Start(BytesStart::new("images")))?;
        for image in &self.images {
            let mut node = BytesStart::new("image");
            node.push_attribute(("format", "JPEG"));
            node.push_attribute(("id", image.id.as_str()));
            if let (Some(width), Some(height)) = (image.width, image.height) {
                node.push_attribute(("width", width.to_string().as_str()));
                node.push_attribute(("height", height.to_string().as_str()));
            }
            writer.write_event(Event::Start(node))?;
            writer.write_event(Event::Text(BytesText::new(&image.data)))?;
            writer.write_event(Event::End(BytesEnd::new("image")))?;
        }
        writer.write_event(Event::End(BytesEnd::new("images")))?;
        Ok(())
    }
}

fn write_entry(writer: &mut Writer<Cursor<Vec<u8>>>, entry: &Entry, index: usize) -> Result<()> {
    let id = entry
        .id
        .clone()
        .unwrap_or_else(|| index.to_string());
    let mut node = BytesStart::new("entry");
    node.push_attribute(("id", id.as_str()));

    if entry.is_empty() {
        writer.write_event(Event::Empty(node))?;
        return Ok(());
    }

    writer.write_event(Event::Start(node))?;
    for field in &entry.fields {
        match field {
            EntryField::Single { name, value } => {
                write_text_element(writer, name, value)?;
            }
            EntryField::Multi {
                parent,
                child,
                values,
            } => {
                writer.write_event(Event::Start(BytesStart::new(parent.as_str())))?;
                for value in values {
                    write_text_element(writer, child, value)?;
                }
                writer.write_event(Event::End(BytesEnd::new(parent.as_str())))?;
            }
            EntryField::Table {
                parent,
                child,
                rows,
            } => {
                writer.write_event(Event::Start(BytesStart::new(parent.as_str())))?;
                for row in rows {
                    writer.write_event(Event::Start(BytesStart::new(child.as_str())))?;
                    for cell in row {
                        write_text_element(writer, "column", cell)?;
                    }
                    writer.write_event(Event::End(BytesEnd::new(child.as_str())))?;
                }
                writer.write_event(Event::End(BytesEnd::new(parent.as_str())))?;
            }
        }
    }
    writer.write_event(Event::End(BytesEnd::new("entry")))?;
    Ok(())
}

fn write_text_element(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    name: &str,
    value: &str,
) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image;

    #[test]
    fn header_and_doctype_come_first() {
        let doc = TellicoDoc::new(CollectionKind::Comics, "My Comics");
        let xml = doc.render().unwrap();
        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(xml.contains(r#"<!DOCTYPE tellico PUBLIC "-//Robby Stephenson/DTD Tellico V9.0//EN""#));
        assert!(xml.contains(r#"<tellico xmlns="http://periapsis.org/tellico/" syntaxVersion="9">"#));
        assert!(xml.contains(r#"<collection title="My Comics" type="6">"#));
        assert!(xml.contains(r#"<field name="_default"/>"#));
    }

    #[test]
    fn an_all_empty_entry_still_serializes() {
        let mut doc = TellicoDoc::new(CollectionKind::Books, "My Books");
        let mut entry = Entry::new();
        entry.field("title", "");
        entry.field("isbn", "   ");
        entry.list("authors", "author", &[]);
        entry.flag("class-eo", false);
        doc.add_entry(entry);

        let xml = doc.render().unwrap();
        // Empty fields are omitted; the entry itself is kept, id and all
        assert!(xml.contains(r#"<entry id="0"/>"#));
        assert!(!xml.contains("<title>"));
        assert!(!xml.contains("<authors>"));
    }

    #[test]
    fn entries_get_sequential_ids_unless_overridden() {
        let mut doc = TellicoDoc::new(CollectionKind::Movies, "My Movies");
        let mut first = Entry::new();
        first.field("title", "Alien");
        doc.add_entry(first);
        let mut second = Entry::new();
        second.field("title", "Brazil");
        second.set_id("42");
        doc.add_entry(second);

        let xml = doc.render().unwrap();
        assert!(xml.contains(r#"<entry id="0"><title>Alien</title></entry>"#));
        assert!(xml.contains(r#"<entry id="42"><title>Brazil</title></entry>"#));
    }

    #[test]
    fn values_are_escaped() {
        let mut doc = TellicoDoc::new(CollectionKind::Books, "My Books");
        let mut entry = Entry::new();
        entry.field("title", "AT&T <considered> \"harmful\"");
        doc.add_entry(entry);
        let xml = doc.render().unwrap();
        assert!(xml.contains("AT&amp;T &lt;considered&gt;"));
    }

    #[test]
    fn lists_and_tables_render_wrapped() {
        let mut doc = TellicoDoc::new(CollectionKind::Movies, "My Movies");
        let mut entry = Entry::new();
        entry.list(
            "genres",
            "genre",
            &["Drama".to_string(), String::new(), "Sci-Fi".to_string()],
        );
        entry.table(
            "casts",
            "cast",
            &[vec!["Harrison Ford".to_string(), "Deckard".to_string()]],
        );
        doc.add_entry(entry);
        let xml = doc.render().unwrap();
        assert!(xml.contains("<genres><genre>Drama</genre><genre>Sci-Fi</genre></genres>"));
        assert!(xml.contains(
            "<casts><cast><column>Harrison Ford</column><column>Deckard</column></cast></casts>"
        ));
    }

    #[test]
    fn field_declarations_carry_their_attributes_and_props() {
        let mut doc = TellicoDoc::new(CollectionKind::Comics, "My Comics");
        doc.add_field(
            FieldDef::new("note", "Note", "0", "Personnel", "4", "14")
                .description("Avis sur l'album")
                .prop("minimum", "0")
                .prop("maximum", "10"),
        );
        let xml = doc.render().unwrap();
        assert!(xml.contains(r#"name="note""#));
        assert!(xml.contains(r#"<prop name="minimum">0</prop>"#));
        assert!(xml.contains(r#"<prop name="maximum">10</prop>"#));
    }

    #[test]
    fn images_round_trip_through_the_document() {
        let blob = b"\xff\xd8\xff\xe0fake jpeg bytes\x00\x01\x02";
        let mut doc = TellicoDoc::new(CollectionKind::Comics, "My Comics");
        let mut entry = Entry::new();
        let id = doc.add_image(image::encode(blob, "jpeg"));
        entry.field("cover", &id);
        doc.add_entry(entry);

        let xml = doc.render().unwrap();
        assert!(xml.contains(&format!("<cover>{}</cover>", id)));

        // Pull the payload back out and decode it
        let open = format!(r#"<image format="JPEG" id="{}">"#, id);
        let start = xml.find(&open).unwrap() + open.len();
        let end = xml[start..].find("</image>").unwrap() + start;
        assert_eq!(image::decode(&xml[start..end]).unwrap(), blob);
    }

    #[test]
    fn sized_images_carry_dimensions() {
        let mut doc = TellicoDoc::new(CollectionKind::Movies, "My Movies");
        doc.add_image_sized(image::encode(b"poster", "jpeg"), 120, 160);
        let xml = doc.render().unwrap();
        assert!(xml.contains(r#"width="120" height="160""#));
    }
}
