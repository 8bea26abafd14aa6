//! Dark Horse Comics catalog search
//!
//! Title search against the publisher's own catalog. Everything is fetched
//! directly; this site does not ban scrapers, so no fallback is engaged.

use crate::extract::{self, rule, ExtractRule, MatchMode};
use crate::fetch::{Fallback, FetchSession};
use crate::image;
use crate::output::{CollectionKind, Entry, FieldDef, TellicoDoc};
use crate::Result;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;
use tracing::{debug, info};

const BASE_URL: &str = "https://www.darkhorse.com";
const SEARCH_PATH: &str = "/Search/";
const COVER_PATH: &str = "/covers/";

#[derive(Debug, clap::Args)]
pub struct DarkHorseArgs {
    /// Comic title to search for
    pub title: String,

    /// Skip cover downloads
    #[arg(long)]
    pub no_images: bool,
}

/// Everything extracted from one product page
#[derive(Debug, Default)]
struct ComicRecord {
    title: String,
    issue: String,
    pub_year: String,
    isbn: String,
    pages: String,
    writers: Vec<String>,
    genres: Vec<String>,
    /// Cover artist, penciller, inker, letterer and colorist names, merged
    artists: BTreeSet<String>,
    /// Publication date, format blurb, then the longest description
    comments: Vec<String>,
    descriptions: Vec<String>,
    cover_url: Option<String>,
    link: String,
}

/// Names inside a contributor blob
fn contributor_names(blob: &str) -> Vec<String> {
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    let re = NAME_RE.get_or_init(|| {
        extract::compile(r#"<a class="contributor-name".*?>(?P<name>.*?)</a"#)
    });
    re.captures_iter(blob)
        .map(|caps| caps["name"].trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

fn add_artists(record: &mut ComicRecord, blob: &str) {
    for name in contributor_names(blob) {
        if name != "Various" {
            record.artists.insert(name);
        }
    }
}

fn rules() -> Vec<ExtractRule<ComicRecord>> {
    vec![
        rule(
            "title",
            MatchMode::First,
            r#"<h2 class=".*?">(?P<title>.*?)</h2>"#,
            |rec, caps| {
                rec.title = caps["title"].trim().to_string();
                // Issue number rides along in the title
                static ISSUE_RE: OnceLock<Regex> = OnceLock::new();
                let re = ISSUE_RE.get_or_init(|| extract::compile("#(?P<issue>[0-9]+)"));
                if let Some(issue) = re.captures(&rec.title) {
                    rec.issue = issue["issue"].to_string();
                }
            },
        ),
        rule(
            "pub_date",
            MatchMode::First,
            r"Publication date:</strong>(?P<pub_date>.*?)</",
            |rec, caps| {
                let pub_date = caps["pub_date"].trim().to_string();
                if pub_date.len() >= 4 {
                    rec.pub_year = pub_date[pub_date.len() - 4..].to_string();
                }
                rec.comments.push(format!("Pub. Date: {}", pub_date));
            },
        ),
        rule(
            "format",
            MatchMode::First,
            r"Format:</strong>(?P<format>.*?)</",
            |rec, caps| {
                let format = caps["format"].trim().to_string();
                static PAGES_RE: OnceLock<Regex> = OnceLock::new();
                let re = PAGES_RE.get_or_init(|| extract::compile("(?P<pages>[0-9]+)"));
                if let Some(pages) = re.captures(&format) {
                    rec.pages = pages["pages"].to_string();
                }
                rec.comments.push(format);
            },
        ),
        rule(
            "desc",
            MatchMode::All,
            r#"<div class="product-description">(?P<desc>.*?)</div>"#,
            |rec, caps| rec.descriptions.push(caps["desc"].trim().to_string()),
        ),
        rule(
            "isbn",
            MatchMode::First,
            r"<dt>ISBN-10:</dt><dd>(?P<isbn>.*?)</dd>",
            |rec, caps| rec.isbn = caps["isbn"].trim().to_string(),
        ),
        rule(
            "genre",
            MatchMode::All,
            r#"<a href="/search/genre.*?">(?P<genre>.*?)</a>"#,
            |rec, caps| {
                let genre = caps["genre"].trim().to_string();
                if !genre.is_empty() && !rec.genres.contains(&genre) {
                    rec.genres.push(genre);
                }
            },
        ),
        rule(
            "writer",
            MatchMode::First,
            r"Writer:</strong>(?P<writer>.*?)</li",
            |rec, caps| rec.writers = contributor_names(&caps["writer"]),
        ),
        rule(
            "cover_artist",
            MatchMode::First,
            r"Artist:</strong>(?P<names>.*?)</li",
            |rec, caps| add_artists(rec, &caps["names"]),
        ),
        rule(
            "penciller",
            MatchMode::First,
            r"Penciller:</strong>(?P<names>.*?)</li",
            |rec, caps| add_artists(rec, &caps["names"]),
        ),
        rule(
            "inker",
            MatchMode::First,
            r"Inker:</strong>(?P<names>.*?)</li",
            |rec, caps| add_artists(rec, &caps["names"]),
        ),
        rule(
            "letterer",
            MatchMode::First,
            r"Letterer:</strong>(?P<names>.*?)</li",
            |rec, caps| add_artists(rec, &caps["names"]),
        ),
        rule(
            "colorist",
            MatchMode::First,
            r"Colorist:</strong>(?P<names>.*?)</li",
            |rec, caps| add_artists(rec, &caps["names"]),
        ),
    ]
}

/// Links to product pages on the search result page, deduplicated
fn product_links(page: &str) -> Vec<String> {
    static LINK_RE: OnceLock<Regex> = OnceLock::new();
    let re = LINK_RE.get_or_init(|| {
        extract::compile(r#"<div class="product-img">.*?<a href="(?P<page>/comics/[^"]*?)">"#)
    });
    let mut seen = BTreeSet::new();
    re.captures_iter(page)
        .map(|caps| caps["page"].to_string())
        .filter(|link| seen.insert(link.clone()))
        .collect()
}

/// The cover path sits in the og:image meta tag
fn cover_url(page: &str) -> Option<String> {
    static COVER_RE: OnceLock<Regex> = OnceLock::new();
    let re = COVER_RE.get_or_init(|| {
        extract::compile(&format!(
            r#"<meta property="og:image" content="(?P<path>[^>]*{}.*?)"[^>]*>"#,
            COVER_PATH
        ))
    });
    Some(re.captures(page)?["path"].trim().to_string())
}

fn extract_record(page: &str, link: &str) -> ComicRecord {
    let mut record = ComicRecord {
        link: link.to_string(),
        ..ComicRecord::default()
    };
    record.cover_url = cover_url(page);

    // Only the content column holds product data
    static CONTENT_RE: OnceLock<Regex> = OnceLock::new();
    let re = CONTENT_RE.get_or_init(|| {
        extract::compile(r#"<div id="content">(?P<part>.*)<div id="content-walls"#)
    });
    let content = re
        .captures(page)
        .map(|caps| caps["part"].to_string())
        .unwrap_or_default();

    extract::run_rules(&rules(), &content, &mut record);

    // Keep the longest description only
    if let Some(desc) = record
        .descriptions
        .iter()
        .max_by_key(|d| d.len())
        .cloned()
    {
        record.comments.push(desc);
    }
    record
}

fn add_entry(doc: &mut TellicoDoc, record: ComicRecord, cover: Option<image::CoverImage>) {
    let mut entry = Entry::new();
    entry.field("title", &record.title);
    entry.field("pub_year", &record.pub_year);
    entry.field("darkhorse", &record.link);
    entry.field("country", "USA");
    entry.field("publisher", "Dark Horse Comics");
    entry.field("language", "English");
    entry.list("writers", "writer", &record.writers);
    entry.list("genres", "genre", &record.genres);
    entry.field("comments", &record.comments.join("\n\n"));
    let artists: Vec<String> = record.artists.into_iter().collect();
    entry.list("artists", "artist", &artists);
    entry.field("pages", &record.pages);
    entry.field("isbn", &record.isbn);
    entry.field("issue", &record.issue);
    if let Some(cover) = cover {
        let id = doc.add_image(cover);
        entry.field("cover", &id);
    }
    doc.add_entry(entry);
}

fn new_document() -> TellicoDoc {
    let mut doc = TellicoDoc::new(CollectionKind::Comics, "My Comics");
    doc.add_field(
        FieldDef::new("darkhorse", "Dark Horse Link", "0", "General", "4", "7").i18n(),
    );
    doc
}

/// Runs the search and returns the document instead of printing it
pub fn build(args: &DarkHorseArgs, session: &mut FetchSession) -> Result<TellicoDoc> {
    let mut doc = new_document();

    // The search term is a path segment, so spaces must become %20
    let mut search_url = url::Url::parse(BASE_URL)?;
    search_url.set_path(&format!("{}{}", SEARCH_PATH, args.title));
    let listing = session.fetch(search_url.as_str(), Fallback::DirectOnly);
    let links = product_links(&listing);
    info!("{} comic(s) found", links.len());

    for link in links {
        let url = format!("{}{}", BASE_URL, link);
        debug!("fetching {}", url);
        let page = session.fetch(&url, Fallback::DirectOnly);
        if page.is_empty() {
            continue;
        }
        let record = extract_record(&page, &url);
        let cover = match (&record.cover_url, args.no_images) {
            (Some(path), false) => image::fetch(session.client(), path),
            _ => None,
        };
        add_entry(&mut doc, record, cover);
    }

    Ok(doc)
}

pub fn run(args: &DarkHorseArgs, session: &mut FetchSession) -> Result<()> {
    let doc = build(args, session)?;
    session.report();
    doc.print()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRODUCT_PAGE: &str = r##"
<html><head>
<meta property="og:image" content="https://images.darkhorse.com/covers/400/12345.jpg" >
</head><body>
<div id="content">
<h2 class="title">Hellboy in Hell #5</h2>
<ul>
<li><strong>Publication date:</strong> June 04, 2014</li>
<li><strong>Format:</strong>FC, 32 pages; Miniseries</li>
<li><strong>Writer:</strong> <a class="contributor-name" href="/x">Mike Mignola</a></li>
<li><strong>Artist:</strong> <a class="contributor-name" href="/x">Mike Mignola</a></li>
<li><strong>Colorist:</strong> <a class="contributor-name" href="/x">Dave Stewart</a></li>
<li><strong>Letterer:</strong> <a class="contributor-name" href="/x">Various</a></li>
</ul>
<dl><dt>ISBN-10:</dt><dd>1-59307-073-3</dd></dl>
<div class="product-description">Short.</div>
<div class="product-description">The longer of the two descriptions wins.</div>
<a href="/search/genre?id=3">Horror</a>
<a href="/search/genre?id=3">Horror</a>
<div id="content-walls"></div></body></html>
"##;

    #[test]
    fn record_extraction_covers_the_field_table() {
        let record = extract_record(PRODUCT_PAGE, "https://www.darkhorse.com/comics/1");
        assert_eq!(record.title, "Hellboy in Hell #5");
        assert_eq!(record.issue, "5");
        assert_eq!(record.pub_year, "2014");
        assert_eq!(record.isbn, "1-59307-073-3");
        assert_eq!(record.pages, "32");
        assert_eq!(record.writers, vec!["Mike Mignola"]);
        assert_eq!(record.genres, vec!["Horror"]);
        // Artist roles merge, "Various" is dropped
        let artists: Vec<&str> = record.artists.iter().map(String::as_str).collect();
        assert_eq!(artists, vec!["Dave Stewart", "Mike Mignola"]);
        assert_eq!(record.comments[0], "Pub. Date: June 04, 2014");
        assert_eq!(record.comments[1], "FC, 32 pages; Miniseries");
        assert_eq!(
            record.comments[2],
            "The longer of the two descriptions wins."
        );
        assert_eq!(
            record.cover_url.as_deref(),
            Some("https://images.darkhorse.com/covers/400/12345.jpg")
        );
    }

    #[test]
    fn search_links_are_deduplicated() {
        let listing = r#"
            <div class="product-img"><a href="/comics/one"></a></div>
            <div class="product-img"><a href="/comics/two"></a></div>
            <div class="product-img"><a href="/comics/one"></a></div>
        "#;
        assert_eq!(product_links(listing), vec!["/comics/one", "/comics/two"]);
    }

    #[test]
    fn constant_fields_and_record_land_in_the_entry() {
        let mut doc = new_document();
        let record = extract_record(PRODUCT_PAGE, "https://www.darkhorse.com/comics/1");
        add_entry(&mut doc, record, None);
        let xml = doc.render().unwrap();
        assert!(xml.contains("<publisher>Dark Horse Comics</publisher>"));
        assert!(xml.contains("<language>English</language>"));
        assert!(xml.contains("<country>USA</country>"));
        assert!(xml.contains("<issue>5</issue>"));
        assert!(xml.contains("<darkhorse>https://www.darkhorse.com/comics/1</darkhorse>"));
        assert!(xml.contains(r#"name="darkhorse" title="Dark Horse Link""#));
    }
}
