//! Spanish ISBN database (Ministerio de Cultura) book search
//!
//! Searches by title, author or ISBN/UPC; several ISBNs can be given at
//! once, separated by `;`, or loaded one-per-line from a file. Unlike the
//! scraping sources, this one treats the primary host being unreachable as
//! fatal: the user gets a message and a non-zero exit instead of an empty
//! collection.

use crate::extract::{self, rule, strip_tags, ExtractRule, MatchMode};
use crate::fetch::FetchSession;
use crate::output::{CollectionKind, Entry, TellicoDoc};
use crate::Result;
use regex::Regex;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::{debug, info};

const BASE_URL: &str = "http://www.mcu.es";
const SEARCH_PATH: &str = "/cgi-brs/BasesHTML/isbn/BRSCGI?CMD=VERLST&BASE=ISBN\
    &DOCS=1-15&CONF=AEISPA.cnf&OPDEF=AND&SEPARADOR=&WDIS-C=DISPONIBLE+or+AGOTADO&WGEN-C=";
const SEARCH_SUFFIX: &str = "&WMAT-C=&WEDI-C=&WFEP-C=&%40T353-GE=&%40T353-LE=\
    &WSER-C=&WLUG-C=&WLEN-C=&WCLA-C=&WSOP-C=";

const TRANSLATOR_MARKER: &str = "tr.";
const EDITOR_MARKER: &str = "ed. lit.";

#[derive(Debug, clap::Args)]
#[group(required = true, multiple = false)]
pub struct MinisterioArgs {
    /// Book title to search for
    #[arg(short, long)]
    pub title: Option<String>,

    /// Author to search for
    #[arg(short, long)]
    pub author: Option<String>,

    /// ISBN or UPC; several can be separated with `;`
    #[arg(short, long)]
    pub isbn: Option<String>,

    /// File holding one ISBN or UPC per line
    #[arg(short = 'm', long, value_name = "FILE")]
    pub isbn_file: Option<PathBuf>,
}

enum Criteria {
    Title(String),
    Author(String),
    Isbn(String),
}

#[derive(Debug, Default)]
struct BookRecord {
    title: String,
    isbn: String,
    edition: String,
    price: String,
    keywords: String,
    series: String,
    series_num: String,
    publisher: String,
    pub_year: String,
    pages: String,
    translator: String,
    authors: Vec<String>,
    languages: Vec<String>,
    comments: Vec<String>,
}

/// Pulls every `pre-name, "marker"` pair out of the author list, returning
/// the names; both the names and the markers are removed in place
fn extract_role(authors: &mut Vec<String>, marker: &str) -> Vec<String> {
    let mut found = Vec::new();
    while let Some(pos) = authors.iter().position(|a| a == marker) {
        authors.remove(pos);
        if pos > 0 {
            found.push(authors.remove(pos - 1));
        }
    }
    found
}

/// The author cell either holds linked names or a plain comma list
fn author_names(cell: &str) -> Vec<String> {
    static LINKED_RE: OnceLock<Regex> = OnceLock::new();
    static PLAIN_RE: OnceLock<Regex> = OnceLock::new();
    let linked = LINKED_RE.get_or_init(|| extract::compile(r"<a.*?>(?P<author>.*?)</a>"));
    let plain = PLAIN_RE.get_or_init(|| extract::compile(r"<li>(?P<author>.*?)</li>"));

    let names: Vec<String> = linked
        .captures_iter(cell)
        .map(|caps| caps["author"].trim().to_string())
        .filter(|name| !name.starts_with("<img"))
        .collect();
    if !names.is_empty() {
        return names;
    }
    match plain.captures(cell) {
        Some(caps) => caps["author"]
            .trim()
            .split(',')
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect(),
        None => Vec::new(),
    }
}

fn apply_authors(rec: &mut BookRecord, cell: &str) {
    let mut authors = author_names(cell);
    let translators = extract_role(&mut authors, TRANSLATOR_MARKER);
    let editors = extract_role(&mut authors, EDITOR_MARKER);
    rec.authors = authors;
    if !translators.is_empty() {
        rec.translator = translators.join("; ");
    }
    if !editors.is_empty() {
        rec.comments
            .push(format!("Editor Literario: {}", editors.join("; ")));
    }
}

/// The language cell packs one `<span>` per language behind a
/// "publicacion:" label
fn languages_from(cell: &str) -> Vec<String> {
    let cell = cell.replace('\n', "");
    cell.split("<span>")
        .map(|piece| piece.replace("</span>", "").replace("&oacute;", "o"))
        .map(|piece| match piece.find("publicacion:") {
            Some(pos) => piece[pos + "publicacion:".len()..].to_string(),
            None => piece,
        })
        .map(|piece| piece.trim().to_string())
        .filter(|piece| !piece.is_empty())
        .collect()
}

/// Publisher and year are folded together in the publication blob:
/// place on the first line, publisher on the third, `MM/YYYY` on the fourth
fn publication_parts(blob: &str) -> Option<(String, String)> {
    static CRUFT_RE: OnceLock<Regex> = OnceLock::new();
    static MONTH_RE: OnceLock<Regex> = OnceLock::new();
    let cruft = CRUFT_RE.get_or_init(|| extract::compile(r"</?[Aa].*?>"));
    let month = MONTH_RE.get_or_init(|| extract::compile(r"[0-9]{2}/"));

    let cleaned = cruft
        .replace_all(blob, "")
        .replace("&nbsp;", "")
        .replace([':', ','], "");
    let lines: Vec<&str> = cleaned.split('\n').collect();
    if lines.len() < 4 {
        return None;
    }
    let publisher = format!("{} ({})", lines[2].trim(), lines[0].trim());
    let year = month.replace(lines[3].trim(), "").to_string();
    Some((publisher, year))
}

/// A series ending in a number is really series + number-within-series
fn split_series(cell: &str) -> (String, String) {
    static NUM_RE: OnceLock<Regex> = OnceLock::new();
    let re = NUM_RE.get_or_init(|| extract::compile(r"[0-9]+$"));

    let series = cell.replace("&nbsp;", " ").trim().to_string();
    let Some(m) = re.find(&series) else {
        return (series, String::new());
    };
    let num = m.as_str().to_string();
    // Drop the number and its separator (space or /)
    let cut = series.len().saturating_sub(num.len() + 1);
    let base = series[..cut].trim_end_matches(',').trim().to_string();
    (base, num)
}

fn rules() -> Vec<ExtractRule<BookRecord>> {
    vec![
        rule(
            "title",
            MatchMode::First,
            r#"<th scope="row">T&iacute;tulo:.*?<td>(?P<title>.*?)</td>"#,
            |rec, caps| {
                let title = caps["title"].trim().replace('\n', "");
                rec.title = strip_tags(&title).trim().to_string();
            },
        ),
        rule(
            "isbn",
            MatchMode::First,
            r#"<span class="cabTitulo">ISBN.*?<strong>(?P<isbn>.*?)</strong>"#,
            |rec, caps| rec.isbn = caps["isbn"].trim().to_string(),
        ),
        rule(
            "author",
            MatchMode::First,
            r#"<th scope="row">Autor:.*?<td>(?P<author>.*?)</td>"#,
            |rec, caps| apply_authors(rec, &caps["author"]),
        ),
        rule(
            "language",
            MatchMode::First,
            r#"<th scope="row">Lengua:.*?<td>(?P<language>.*?)</td>"#,
            |rec, caps| rec.languages = languages_from(&caps["language"]),
        ),
        rule(
            "edition",
            MatchMode::First,
            r#"<th scope="row">Edici&oacute;n:.*?<td>.*?<span>(?P<edition>.*?)</span>"#,
            |rec, caps| rec.edition = caps["edition"].trim().to_string(),
        ),
        rule(
            "pur_price",
            MatchMode::First,
            r#"<th scope="row">Precio:.*?<td>.*?<span>(?P<price>.*?)&euro;</span>"#,
            |rec, caps| rec.price = format!("{} EUR", caps["price"].trim()),
        ),
        rule(
            "desc",
            MatchMode::First,
            r#"<th scope="row">Descripci&oacute;n:.*?<td>.*?<span>(?P<desc>.*?)</span>"#,
            |rec, caps| {
                let desc = &caps["desc"];
                static PAGES_RE: OnceLock<Regex> = OnceLock::new();
                static FORMAT_RE: OnceLock<Regex> = OnceLock::new();
                let pages = PAGES_RE.get_or_init(|| extract::compile(r"[0-9]+ "));
                let format = FORMAT_RE.get_or_init(|| extract::compile(r"; (?P<format>.*cm)"));
                if let Some(m) = pages.find(desc) {
                    rec.pages = m.as_str().trim().to_string();
                }
                if let Some(caps) = format.captures(desc) {
                    rec.comments
                        .push(format!("Format: {}", caps["format"].trim()));
                }
            },
        ),
        rule(
            "publication",
            MatchMode::First,
            r#"<th scope="row">Publicaci&oacute;n:.*?<td>.*?<span>(?P<publication>.*?)</span>"#,
            |rec, caps| {
                if let Some((publisher, year)) = publication_parts(&caps["publication"]) {
                    rec.publisher = publisher;
                    rec.pub_year = year;
                }
            },
        ),
        rule(
            "keyword",
            MatchMode::First,
            r#"<th scope="row">Materias:.*?<td>.*?<span>(?P<keywords>.*?)</span>"#,
            |rec, caps| rec.keywords = strip_tags(&caps["keywords"]).trim().to_string(),
        ),
        rule(
            "notas",
            MatchMode::First,
            r#"<th scope="row">Notas:.*?<td>.*?<span>(?P<notas>.*?)</span>"#,
            |rec, caps| rec.comments.push(caps["notas"].trim().to_string()),
        ),
        rule(
            "cdu",
            MatchMode::First,
            r#"<th scope="row">CDU:.*?<td><span>(?P<cdu>.*?)</span></td>"#,
            |rec, caps| rec.comments.push(format!("CDU: {}", caps["cdu"].trim())),
        ),
        rule(
            "encuadernacion",
            MatchMode::First,
            r#"<th scope="row">Encuadernaci&oacute;n:.*?<td>.*?<span>(?P<binding>.*?)</span>"#,
            |rec, caps| rec.comments.push(caps["binding"].trim().to_string()),
        ),
        rule(
            "series",
            MatchMode::First,
            r#"<th scope="row">Colecci&oacute;n:.*?<td>.*?<span>(?P<series>.*?)</span>"#,
            |rec, caps| {
                let (series, series_num) = split_series(&caps["series"]);
                rec.series = series;
                rec.series_num = series_num;
            },
        ),
    ]
}

/// Detail-page links on the result listing
fn book_links(page: &str) -> Vec<String> {
    static LINK_RE: OnceLock<Regex> = OnceLock::new();
    let re = LINK_RE.get_or_init(|| {
        extract::compile(
            r#"<div class="isbnResDescripcion">.*?<p>.*?<A target="_top" HREF="(?P<url>.*?)">"#,
        )
    });
    re.captures_iter(page)
        .map(|caps| caps["url"].to_string())
        .collect()
}

fn search_url(criteria: &Criteria) -> String {
    let (isbn, author, title) = match criteria {
        Criteria::Isbn(value) => (crate::fetch::urlquote(value), String::new(), String::new()),
        Criteria::Author(value) => (String::new(), crate::fetch::urlquote(value), String::new()),
        Criteria::Title(value) => (String::new(), String::new(), crate::fetch::urlquote(value)),
    };
    format!(
        "{}{}&WISB-C={}&WAUT-C={}&WTIT-C={}{}",
        BASE_URL, SEARCH_PATH, isbn, author, title, SEARCH_SUFFIX
    )
}

fn add_entry(doc: &mut TellicoDoc, record: BookRecord) {
    let mut entry = Entry::new();
    entry.field("title", &record.title);
    entry.field("pub_year", &record.pub_year);
    entry.field("publisher", &record.publisher);
    entry.list("languages", "language", &record.languages);
    entry.list("keywords", "keyword", &[record.keywords.clone()]);
    entry.field("edition", &record.edition);
    entry.list("authors", "author", &record.authors);
    entry.field("comments", &record.comments.join("<br/>"));
    entry.field("pages", &record.pages);
    entry.field("isbn", &record.isbn);
    entry.field("pur_price", &record.price);
    entry.field("series", &record.series);
    entry.field("series_num", &record.series_num);
    entry.field("translator", &record.translator);
    doc.add_entry(entry);
}

fn gather_criteria(args: &MinisterioArgs) -> Result<Vec<Criteria>> {
    if let Some(title) = &args.title {
        return Ok(vec![Criteria::Title(title.clone())]);
    }
    if let Some(author) = &args.author {
        return Ok(vec![Criteria::Author(author.clone())]);
    }
    let isbns = match (&args.isbn, &args.isbn_file) {
        (Some(isbn), _) => isbn.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)?
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(";"),
        (None, None) => String::new(),
    };
    // Hyphens never appear in the database's ISBN index
    let isbns = isbns.replace('-', "");
    Ok(isbns
        .split(';')
        .filter(|isbn| !isbn.is_empty())
        .map(|isbn| Criteria::Isbn(isbn.to_string()))
        .collect())
}

/// Runs the search and returns the document instead of printing it
pub fn build(args: &MinisterioArgs, session: &mut FetchSession) -> Result<TellicoDoc> {
    let mut doc = TellicoDoc::new(CollectionKind::Books, "My Books");

    for criteria in gather_criteria(args)? {
        let listing = session.fetch_required(&search_url(&criteria))?;
        let links = book_links(&listing);
        info!("{} book(s) found", links.len());
        for link in links {
            let url = format!("{}{}", BASE_URL, link.replace(' ', "%20"));
            debug!("fetching {}", url);
            let page = session.fetch_required(&url)?;
            let mut record = BookRecord::default();
            extract::run_rules(&rules(), &page, &mut record);
            add_entry(&mut doc, record);
        }
    }

    Ok(doc)
}

pub fn run(args: &MinisterioArgs, session: &mut FetchSession) -> Result<()> {
    let doc = build(args, session)?;
    session.report();
    doc.print()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translators_are_split_out_of_the_author_list() {
        let mut authors: Vec<String> = [
            "Stephen King",
            "Lorenzo Cortina",
            "tr.",
            "Rosalía Vázquez",
            "tr.",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let translators = extract_role(&mut authors, TRANSLATOR_MARKER);
        assert_eq!(translators, vec!["Lorenzo Cortina", "Rosalía Vázquez"]);
        assert_eq!(authors, vec!["Stephen King"]);
    }

    #[test]
    fn author_cell_with_links_and_without() {
        let linked = r#"<ul><li><a href="/a">Arturo Pérez-Reverte</a></li>
            <li><a href="/b"><img src="x.png"></a></li></ul>"#;
        assert_eq!(author_names(linked), vec!["Arturo Pérez-Reverte"]);

        let plain = "<ul><li>Cervantes, Miguel de</li></ul>";
        assert_eq!(author_names(plain), vec!["Cervantes", "Miguel de"]);
    }

    #[test]
    fn publication_blob_splits_into_publisher_and_year() {
        let blob = "Madrid\n\nAlfaguara\n05/2007";
        let (publisher, year) = publication_parts(blob).unwrap();
        assert_eq!(publisher, "Alfaguara (Madrid)");
        assert_eq!(year, "2007");
    }

    #[test]
    fn series_number_is_split_off_the_series() {
        assert_eq!(
            split_series("Byblos, 162/24"),
            ("Byblos, 162".to_string(), "24".to_string())
        );
        assert_eq!(
            split_series("Byblos&nbsp;24"),
            ("Byblos".to_string(), "24".to_string())
        );
        assert_eq!(
            split_series("Austral"),
            ("Austral".to_string(), String::new())
        );
    }

    #[test]
    fn languages_lose_their_label_and_markup() {
        let cell = "publicacion: <span>Castellano</span>\n<span>traducido del: Ingl&oacute;s</span>";
        let languages = languages_from(cell);
        assert_eq!(languages[0], "Castellano");
        assert!(languages[1].contains("Inglos"));
    }

    #[test]
    fn isbn_criteria_strip_hyphens_and_split() {
        let args = MinisterioArgs {
            title: None,
            author: None,
            isbn: Some("84-204-8304-0;978-84-204-8305-1".to_string()),
            isbn_file: None,
        };
        let criteria = gather_criteria(&args).unwrap();
        assert_eq!(criteria.len(), 2);
        match &criteria[0] {
            Criteria::Isbn(isbn) => assert_eq!(isbn, "8420483040"),
            _ => panic!("expected an ISBN criteria"),
        }
    }

    #[test]
    fn the_fixture_populates_exactly_the_matched_fields() {
        let page = r#"
<div><span class="cabTitulo">ISBN <strong>978-84-204-8305-1</strong></span></div>
<table>
<tr><th scope="row">T&iacute;tulo:</th><td><strong>El pintor de batallas</strong></td></tr>
<tr><th scope="row">Autor:</th><td><a href="/aut">Arturo Pérez-Reverte</a></td></tr>
</table>
"#;
        let mut record = BookRecord::default();
        extract::run_rules(&rules(), page, &mut record);
        assert_eq!(record.title, "El pintor de batallas");
        assert_eq!(record.isbn, "978-84-204-8305-1");
        assert_eq!(record.authors, vec!["Arturo Pérez-Reverte"]);
        // Everything else keeps its default
        assert!(record.publisher.is_empty());
        assert!(record.languages.is_empty());
        assert!(record.comments.is_empty());
        assert!(record.series.is_empty());
        assert!(record.pages.is_empty());
    }

    #[test]
    fn records_serialize_with_empty_fields_omitted() {
        let mut doc = TellicoDoc::new(CollectionKind::Books, "My Books");
        add_entry(&mut doc, BookRecord::default());
        let mut full = BookRecord::default();
        full.title = "El pintor de batallas".to_string();
        full.price = "22.50 EUR".to_string();
        add_entry(&mut doc, full);

        let xml = doc.render().unwrap();
        assert!(xml.contains(r#"<entry id="0"/>"#));
        assert!(xml.contains("<pur_price>22.50 EUR</pur_price>"));
    }
}
