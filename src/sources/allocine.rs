//! AlloCiné movie database search
//!
//! Title search; every matching film page is scraped for the usual movie
//! fields plus a link back to the film's page in a custom URL field.

use crate::extract::{self, line_rule, strip_tags, ExtractRule, MatchMode};
use crate::fetch::{Fallback, FetchSession};
use crate::image;
use crate::output::{CollectionKind, Entry, FieldDef, TellicoDoc};
use crate::Result;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, info};

const BASE_URL: &str = "http://www.allocine.fr";
const FILM_PATH: &str = "/film/fichefilm_gen_cfilm";
const SEARCH_URL: &str = "http://www.allocine.fr/recherche/?motcle={}&f=3&rub=1";

#[derive(Debug, clap::Args)]
pub struct AllocineArgs {
    /// Movie title to search for
    pub title: String,

    /// Skip poster downloads
    #[arg(long)]
    pub no_images: bool,
}

#[derive(Debug, Default)]
struct MovieRecord {
    title: String,
    original_title: String,
    year: String,
    genres: Vec<String>,
    nationality: String,
    cast: Vec<String>,
    directors: Vec<String>,
    /// Total running time in minutes
    running_time: String,
    plot: String,
    link: String,
    image_url: Option<String>,
}

/// Comma-separated names inside a stripped anchor blob
fn name_list(blob: &str) -> Vec<String> {
    strip_tags(blob)
        .split(',')
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

fn rules() -> Vec<ExtractRule<MovieRecord>> {
    vec![
        line_rule(
            "title",
            MatchMode::First,
            r"<title>(?P<title>.+?)</title>",
            |rec, caps| rec.title = caps["title"].trim().to_string(),
        ),
        line_rule(
            "directors",
            MatchMode::First,
            r"Réalisé par <a.*?>(?P<names>.+)</a>",
            |rec, caps| rec.directors = name_list(&caps["names"]),
        ),
        line_rule(
            "cast",
            MatchMode::First,
            r"<h4>Avec *<a.*?>(?P<names>.+)</a>",
            |rec, caps| rec.cast = name_list(&caps["names"]),
        ),
        line_rule(
            "nationality",
            MatchMode::First,
            r"<h4>Film *(?P<nat>.+)[,.]",
            |rec, caps| rec.nationality = caps["nat"].trim().to_string(),
        ),
        line_rule(
            "genres",
            MatchMode::First,
            r"<h4>Genre *: *<a.*?>(?P<names>.+)</a>",
            |rec, caps| rec.genres = name_list(&caps["names"]),
        ),
        line_rule(
            "running_time",
            MatchMode::First,
            r"<h4>Durée *: *(?P<hours>[0-9])?h *(?P<mins>[0-9]{1,2})min",
            |rec, caps| {
                let hours: u32 = caps
                    .name("hours")
                    .and_then(|h| h.as_str().parse().ok())
                    .unwrap_or(0);
                let mins: u32 = caps["mins"].parse().unwrap_or(0);
                rec.running_time = (hours * 60 + mins).to_string();
            },
        ),
        line_rule(
            "year",
            MatchMode::First,
            r"Année de production *: *(?P<year>[0-9]{4})",
            |rec, caps| rec.year = caps["year"].to_string(),
        ),
        line_rule(
            "original_title",
            MatchMode::First,
            r"Titre original *: *<i>(?P<otitle>.+)</i>",
            |rec, caps| rec.original_title = caps["otitle"].trim().to_string(),
        ),
        line_rule(
            "plot",
            MatchMode::First,
            r#"(?s)<td valign="top" style="padding:10 0 0 0"><div align="justify"><h4> *(?P<plot>.+?) *</h4>"#,
            |rec, caps| rec.plot = caps["plot"].trim().to_string(),
        ),
        line_rule(
            "image",
            MatchMode::First,
            r#"(?s)<td valign="top".*?<img src="(?P<image>.+?)" border"#,
            |rec, caps| rec.image_url = Some(caps["image"].trim().to_string()),
        ),
    ]
}

/// `(page, title)` pairs on the search result page
fn film_links(page: &str) -> Vec<(String, String)> {
    static LINK_RE: OnceLock<Regex> = OnceLock::new();
    let re = LINK_RE.get_or_init(|| {
        extract::compile_single_line(&format!(
            r#"<a *href="{}=(?P<page>.*?\.html?)" *class="link1">(?P<t>.*?)</a>"#,
            FILM_PATH
        ))
    });
    re.captures_iter(page)
        .map(|caps| (caps["page"].to_string(), caps["t"].to_string()))
        .collect()
}

fn add_entry(doc: &mut TellicoDoc, record: MovieRecord, poster: Option<image::CoverImage>) {
    let mut entry = Entry::new();
    entry.field("title", &record.title);
    entry.field("titre-original", &record.original_title);
    entry.field("year", &record.year);
    entry.list("genres", "genre", &record.genres);
    entry.list("nationalitys", "nat", &[record.nationality.clone()]);
    let cast_rows: Vec<Vec<String>> = record
        .cast
        .iter()
        .map(|actor| vec![actor.clone(), String::new()])
        .collect();
    entry.table("casts", "cast", &cast_rows);
    entry.list("directors", "director", &record.directors);
    entry.field("running-time", &record.running_time);
    entry.field("allociné-link", &record.link);
    entry.field("plot", &record.plot);
    if let Some(poster) = poster {
        let id = doc.add_image_sized(poster, 120, 160);
        entry.field("cover", &id);
    }
    doc.add_entry(entry);
}

fn new_document() -> TellicoDoc {
    let mut doc = TellicoDoc::new(CollectionKind::Movies, "My Movies");
    doc.add_field(
        FieldDef::new("titre-original", "Titre Original", "8", "General", "1", "1").i18n(),
    );
    doc.add_field(
        FieldDef::new("allociné-link", "Lien AlloCiné", "0", "General", "4", "7")
            .description("URL de la fiche du film"),
    );
    doc
}

/// Runs the search and returns the document instead of printing it
pub fn build(args: &AllocineArgs, session: &mut FetchSession) -> Result<TellicoDoc> {
    let mut doc = new_document();

    let search_url = SEARCH_URL.replace("{}", &crate::fetch::urlquote(&args.title));
    let listing = session.fetch(&search_url, Fallback::DirectOnly);
    let links = film_links(&listing);
    info!("{} film(s) found", links.len());

    for (page_ref, _) in links {
        let url = format!("{}{}={}", BASE_URL, FILM_PATH, page_ref);
        debug!("fetching {}", url);
        let page = session.fetch(&url, Fallback::DirectOnly);
        if page.is_empty() {
            continue;
        }
        let mut record = MovieRecord {
            link: url.clone(),
            ..MovieRecord::default()
        };
        extract::run_rules(&rules(), &page, &mut record);
        let poster = match (&record.image_url, args.no_images) {
            (Some(image_url), false) => image::fetch(session.client(), image_url),
            _ => None,
        };
        add_entry(&mut doc, record, poster);
    }

    Ok(doc)
}

pub fn run(args: &AllocineArgs, session: &mut FetchSession) -> Result<()> {
    let doc = build(args, session)?;
    session.report();
    doc.print()
}
