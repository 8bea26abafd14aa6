//! bedetheque.com comic database search
//!
//! The one source that needs the full fallback chain: the site bans IPs
//! that query it too often, so every album page may be served directly,
//! from the search-engine cache, or through a public proxy. Searches mix
//! title, author, ISBN and legal-deposit criteria, or skip straight to an
//! album page given its link. Critics are pulled from the companion review
//! site, and reeditions inherit whatever fields their original edition
//! already established.

use crate::extract::{self, rule, ExtractRule, MatchMode};
use crate::fetch::{urlquote, Fallback, FetchSession};
use crate::image;
use crate::output::{CollectionKind, Entry, FieldDef, TellicoDoc};
use crate::Result;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;
use tracing::{debug, info};

const BASE_URL: &str = "http://www.bedetheque.com";
const REVIEW_URL: &str = "http://www.bdgest.com";
const SEARCH_PATH: &str = "/index.php?R=1&RechTexte={text}&Recherche=OK&RechSerie={serie}\
    &RechAuteur={author}&RechISBN={isbn}&RechDL={dl}";
const CRITIC_SEARCH_PATH: &str = "/critique.php?cherchecrit={serie}";

#[derive(Debug, clap::Args)]
#[command(group(
    clap::ArgGroup::new("criteria")
        .required(true)
        .multiple(true)
        .args(["title", "author", "isbn", "dl", "link"])
))]
pub struct BedethequeArgs {
    /// Album or series title to search for
    #[arg(short, long)]
    pub title: Option<String>,

    /// Author name (only the first word is used, matching the site's own
    /// search behavior)
    #[arg(short, long)]
    pub author: Option<String>,

    /// ISBN to search for
    #[arg(long)]
    pub isbn: Option<String>,

    /// Legal-deposit date, MM/YYYY or YYYY/MM
    #[arg(long, value_name = "DATE")]
    pub dl: Option<String>,

    /// Direct link to an album page; other criteria are ignored
    #[arg(long, value_name = "URL")]
    pub link: Option<String>,

    /// Include reeditions
    #[arg(short, long)]
    pub reeditions: bool,

    /// Album count above which images are skipped (-1 for no limit)
    #[arg(short, long, default_value_t = -1)]
    pub limit: i64,

    /// Download thumbnail images instead of full-size ones
    #[arg(long)]
    pub thumbnails: bool,

    /// Do not fetch critics
    #[arg(long)]
    pub no_critics: bool,

    /// Result count above which only serie/title/legal deposit are emitted
    #[arg(short, long, default_value_t = 20, value_name = "N")]
    pub fast: i64,
}

/// One album on the search result page; an album can list several
/// `(legal deposit, issue)` editions
#[derive(Debug, Default, Clone)]
struct AlbumLink {
    url: String,
    title: String,
    serie: String,
    issues: Vec<(String, String)>,
}

/// Everything extracted from one edition block of an album page
#[derive(Debug, Default, Clone)]
struct AlbumRecord {
    serie: String,
    title: String,
    issue: String,
    /// Normalized to YYYY/MM
    depotlegal: String,
    year: String,
    month: String,
    acheveimprimer: String,
    dessin: String,
    writer: String,
    coloriste: String,
    publisher: String,
    collec: String,
    isbn: String,
    cote: String,
    pages: String,
    note: String,
    note_frame: String,
    infos: String,
    synopsis: String,
    texte_chronique: String,
    cover: String,
    back: String,
    planche: String,
    class_int: bool,
    class_eo: bool,
    class_tt: bool,
    class_br: bool,
    class_tl: bool,
    link: String,
}

/// Repeated matches for one field are `;`-joined, the site's own list
/// separator
fn push_joined(slot: &mut String, item: &str) {
    let item = item.trim();
    if item.is_empty() {
        return;
    }
    if slot.is_empty() {
        slot.push_str(item);
    } else {
        slot.push(';');
        slot.push_str(item);
    }
}

fn album_rules() -> Vec<ExtractRule<AlbumRecord>> {
    vec![
        rule(
            "depotlegal",
            MatchMode::First,
            r"Dépot légal :</td><td>([0-9]{2})/([0-9]{4})",
            |rec, caps| {
                let (month, year) = (&caps[1], &caps[2]);
                rec.depotlegal = format!("{}/{}", year, month);
                rec.year = year.to_string();
                rec.month = month.to_string();
            },
        ),
        rule(
            "acheveimprimer",
            MatchMode::All,
            r"Achevé impr. :</td><td>([^<]*)",
            |rec, caps| push_joined(&mut rec.acheveimprimer, &caps[1]),
        ),
        rule(
            "dessin",
            MatchMode::All,
            r#"<tr><td>Dessin :</td><td><A HREF="[^>]+>([^<]*)</A></td></tr>"#,
            |rec, caps| push_joined(&mut rec.dessin, &caps[1]),
        ),
        rule(
            "writer",
            MatchMode::All,
            r"<tr><td>Scénario :</td><td><A HREF=[^>]+>([^<]+)</A></td></tr>",
            |rec, caps| push_joined(&mut rec.writer, &caps[1]),
        ),
        rule(
            "coloriste",
            MatchMode::All,
            r"<tr><td>Couleurs :</td><td><A [^>]+>([^<]*)</A></td></tr>",
            |rec, caps| push_joined(&mut rec.coloriste, &caps[1]),
        ),
        rule(
            "publisher",
            MatchMode::All,
            r"<tr><td>Editeur :</td><td>([^<]*)</td></tr>",
            |rec, caps| push_joined(&mut rec.publisher, &caps[1]),
        ),
        rule(
            "collec",
            MatchMode::All,
            r"<tr><td>Collection : </td><td>([^<]*)</td></tr>",
            |rec, caps| push_joined(&mut rec.collec, &caps[1]),
        ),
        rule(
            "isbn",
            MatchMode::All,
            r"<tr><td>ISBN :</td><td>([^<]*)</td></tr>",
            |rec, caps| push_joined(&mut rec.isbn, &caps[1]),
        ),
        rule(
            "infos",
            MatchMode::All,
            r"<b>Info édition : </b><i>(.*?)</i></div>",
            |rec, caps| push_joined(&mut rec.infos, &caps[1]),
        ),
        rule(
            "synopsis",
            MatchMode::All,
            r"<b>Résumé de la série : </b><i>(.*?)</i></div>",
            |rec, caps| push_joined(&mut rec.synopsis, &caps[1]),
        ),
        rule(
            "cote",
            MatchMode::All,
            r"<tr><td>Estimation :</td><td>([^<]*)</td></tr>",
            |rec, caps| push_joined(&mut rec.cote, &caps[1]),
        ),
        rule(
            "pages",
            MatchMode::All,
            r"<tr><td>Planches :</td><td>([0-9]*)</td></tr>",
            |rec, caps| push_joined(&mut rec.pages, &caps[1]),
        ),
        rule(
            "cover",
            MatchMode::All,
            r#"<A HREF="(Couvertures/[^"]*)""#,
            |rec, caps| push_joined(&mut rec.cover, &caps[1]),
        ),
        rule(
            "back",
            MatchMode::All,
            r#"<a href="(Versos/[^"]*)""#,
            |rec, caps| push_joined(&mut rec.back, &caps[1]),
        ),
        rule(
            "planche",
            MatchMode::All,
            r#"<a href="(Planches/[^"]*)""#,
            |rec, caps| push_joined(&mut rec.planche, &caps[1]),
        ),
        rule(
            "note",
            MatchMode::First,
            r#"<iframe src="(frame_rating\.php\?Id=[A-Z0-9]+)"#,
            |rec, caps| rec.note_frame = caps[1].to_string(),
        ),
        rule(
            "class-int",
            MatchMode::First,
            r#"<IMG SRC="images/Inte\.png""#,
            |rec, _| rec.class_int = true,
        ),
        rule(
            "class-eo",
            MatchMode::First,
            r#"<IMG SRC="images/Edo\.png""#,
            |rec, _| rec.class_eo = true,
        ),
        rule(
            "class-tt",
            MatchMode::First,
            r#"<IMG SRC="images/TT\.png""#,
            |rec, _| rec.class_tt = true,
        ),
        rule(
            "class-br",
            MatchMode::First,
            r#"<IMG SRC="images/Broche\.png""#,
            |rec, _| rec.class_br = true,
        ),
        // Layout variants of the contributor rows, tried when the main
        // pattern came up empty
        rule(
            "dessin-alt",
            MatchMode::All,
            r#"<tr><td>Dessin :</td><td><A HREF="[^>]*><font [^>]*>([^<]*)</font></A></td></tr>"#,
            |rec, caps| {
                if rec.dessin.is_empty() {
                    push_joined(&mut rec.dessin, &caps[1]);
                }
            },
        ),
        rule(
            "coloriste-alt",
            MatchMode::All,
            r"<tr><td>Couleurs :</td><td><A [^>]+>([^<]*)</font></A></td></tr>",
            |rec, caps| {
                if rec.coloriste.is_empty() {
                    push_joined(&mut rec.coloriste, &caps[1]);
                }
            },
        ),
        rule(
            "publisher-alt",
            MatchMode::All,
            r"<tr><td>Editeur :</td><td><a[^>]*>([^<]*)</a></td></tr>",
            |rec, caps| {
                if rec.publisher.is_empty() {
                    push_joined(&mut rec.publisher, &caps[1]);
                }
            },
        ),
    ]
}

/// Multi-value cells spread one name per table row; joining them with `;`
/// first lets a single pattern capture the whole list
fn normalize_block(block: &str) -> String {
    static JOIN_RE: OnceLock<Regex> = OnceLock::new();
    let join = JOIN_RE
        .get_or_init(|| extract::compile(r"</a></td></tr><tr><td></td><td><a [^>]*>"));
    // Lowercase only: the uppercase </FONT> markup is what the alternate
    // contributor patterns key on
    join.replace_all(block, ";").replace("</font>", "")
}

/// Search result rows; two layouts exist, with and without an issue number
fn search_links(page: &str) -> BTreeMap<String, AlbumLink> {
    static WITH_ISSUE: OnceLock<Regex> = OnceLock::new();
    static WITHOUT_ISSUE: OnceLock<Regex> = OnceLock::new();
    static PARENS: OnceLock<Regex> = OnceLock::new();
    let with_issue = WITH_ISSUE.get_or_init(|| {
        extract::compile(
            r#"<A HREF="(?P<url>album-(?P<id>[0-9]+)-[^"]*?)"[^>]*?><i>(?P<serie>[^<]*)</i> *-(?P<issue>[^ ]*?)- *(?P<title>[^<]*?)</A></TD><TD.*?>(?P<date>.*?)</TD></tr>"#,
        )
    });
    let without_issue = WITHOUT_ISSUE.get_or_init(|| {
        extract::compile(
            r#"<A HREF="(?P<url>album-(?P<id>[0-9]+)-[^"]*?)"[^>]*?><i>(?P<serie>[^<]*)</i> *(?P<issue>)(?P<title>[^ -][^<]*?)</A></TD><TD.*?>(?P<date>.*?)</TD></tr>"#,
        )
    });
    let parens = PARENS.get_or_init(|| extract::compile(r"\([^)]*\)"));

    let mut links: BTreeMap<String, AlbumLink> = BTreeMap::new();
    for re in [with_issue, without_issue] {
        for caps in re.captures_iter(page) {
            let id = caps["id"].to_string();
            let serie = parens.replace_all(&caps["serie"], "").trim().to_string();
            let issue = (caps["date"].to_string(), caps["issue"].to_string());
            links
                .entry(id)
                .and_modify(|link| link.issues.push(issue.clone()))
                .or_insert_with(|| AlbumLink {
                    url: caps["url"].to_string(),
                    title: caps["title"].to_string(),
                    serie,
                    issues: vec![issue],
                });
        }
    }
    links
}

/// Serie, title and issue as printed on the album page header
fn page_heading(page: &str) -> (String, String, String) {
    static SERIE_RE: OnceLock<Regex> = OnceLock::new();
    static TITLE_RE: OnceLock<Regex> = OnceLock::new();
    static ISSUE_RE: OnceLock<Regex> = OnceLock::new();
    let serie_re = SERIE_RE.get_or_init(|| {
        extract::compile(r#"<h2><b>Série : <a href="serie-[0-9]*-.*?">([^<]*)</a></b></h2>"#)
    });
    let title_re = TITLE_RE.get_or_init(|| extract::compile(r"<h1>([^<]*)</h1>"));
    let issue_re =
        ISSUE_RE.get_or_init(|| extract::compile(r"<title>.*? -([0-9]*)- [^<]*</title>"));

    let first = |re: &Regex| {
        re.captures(page)
            .map(|caps| caps[1].trim().to_string())
            .unwrap_or_default()
    };
    (first(serie_re), first(title_re), first(issue_re))
}

/// The edition blocks of an album page, one per printing
fn edition_blocks(page: &str) -> Vec<String> {
    static ITEM_RE: OnceLock<Regex> = OnceLock::new();
    let re = ITEM_RE.get_or_init(|| {
        extract::compile(
            r#"<td align="left" valign="top" WIDTH="[0-9]*"><div class="img-shadow">.*?<div id="ErreurAlbum"#,
        )
    });
    re.find_iter(page).map(|m| m.as_str().to_string()).collect()
}

fn leading_digits(text: &str) -> String {
    text.chars().take_while(|c| c.is_ascii_digit()).collect()
}

/// `MM/YYYY` into (month, year)
fn month_year(date: &str) -> Option<(String, String)> {
    static DATE_RE: OnceLock<Regex> = OnceLock::new();
    let re = DATE_RE.get_or_init(|| extract::compile(r"^([0-9]{2})/([0-9]{4})"));
    let caps = re.captures(date)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

/// Accepts YYYY/MM too, normalizing to the MM/YYYY the search form expects
fn normalize_dl(dl: &str) -> String {
    static YEAR_FIRST: OnceLock<Regex> = OnceLock::new();
    let re = YEAR_FIRST.get_or_init(|| extract::compile(r"^([0-9]{4})/([0-9]{2})$"));
    let dl = dl.trim();
    match re.captures(dl) {
        Some(caps) => format!("{}/{}", &caps[2], &caps[1]),
        None => dl.to_string(),
    }
}

/// Album titles come prefixed with sort keys and serie echoes; strip both
fn normalize_title(title: &str) -> String {
    static PREFIX_RE: OnceLock<Regex> = OnceLock::new();
    // Case-sensitive: lowercase words ahead of a period are real title text
    let re = PREFIX_RE
        .get_or_init(|| Regex::new(r"^[A-Z]*[0-9]*\. *(.+)$").expect("prefix pattern compiles"));
    let title = title.trim();
    let title = match re.captures(title) {
        Some(caps) => caps[1].to_string(),
        None => title.to_string(),
    };
    if !title.contains(';') {
        return title;
    }
    let parts: Vec<&str> = title.splitn(2, ';').collect();
    if parts[0].is_empty() {
        parts[1].to_string()
    } else if !parts[1].is_empty() {
        if parts[0].starts_with("Volume") || parts[0].starts_with("Tome") {
            parts[1].to_string()
        } else {
            title
        }
    } else {
        String::new()
    }
}

/// Reeditions fall back on the original edition for plain facts, and
/// always share its identity fields
fn inherit_from_original(record: &mut AlbumRecord, original: &AlbumRecord) {
    let fill = |slot: &mut String, value: &str| {
        if slot.is_empty() {
            *slot = value.to_string();
        }
    };
    fill(&mut record.publisher, &original.publisher);
    fill(&mut record.dessin, &original.dessin);
    fill(&mut record.writer, &original.writer);
    fill(&mut record.coloriste, &original.coloriste);
    fill(&mut record.isbn, &original.isbn);
    fill(&mut record.pages, &original.pages);
    fill(&mut record.note, &original.note);

    record.issue = original.issue.clone();
    record.title = original.title.clone();
    record.serie = original.serie.clone();
    record.texte_chronique = original.texte_chronique.clone();
}

#[derive(Debug, Clone)]
struct Chronicle {
    url: String,
    title: String,
    text: Option<String>,
}

/// Per-serie critic lookup, cached for the run
#[derive(Debug, Default)]
struct CriticIndex {
    by_serie: HashMap<String, Vec<Chronicle>>,
}

impl CriticIndex {
    fn chronicles(&mut self, session: &mut FetchSession, serie: &str) -> &mut Vec<Chronicle> {
        static LINK_RE: OnceLock<Regex> = OnceLock::new();
        let re = LINK_RE.get_or_init(|| {
            extract::compile(
                r#"<A HREF="http://www\.bdgest\.com/(?P<chro_url>chronique[^"]*)" title="Voir la critique"><FONT[^>]*><b>(?P<serie>[^<]*)</b></font></A> .*?(?:<br>)?<font.*?>(?P<title>.*?)</font>"#,
            )
        });
        self.by_serie.entry(serie.to_string()).or_insert_with(|| {
            let url = format!(
                "{}{}",
                REVIEW_URL,
                CRITIC_SEARCH_PATH.replace("{serie}", &urlquote(serie))
            );
            let page = session.fetch(&url, Fallback::Full);
            let chronicles: Vec<Chronicle> = re
                .captures_iter(&page)
                .map(|caps| Chronicle {
                    url: caps["chro_url"].to_string(),
                    title: caps["title"].to_string(),
                    text: None,
                })
                .collect();
            info!("{} critic(s) found for the serie {}", chronicles.len(), serie);
            chronicles
        })
    }

    /// The text of the first critic whose title mentions the album
    fn critic_for(
        &mut self,
        session: &mut FetchSession,
        serie: &str,
        album_title: &str,
    ) -> Option<String> {
        static TEXT_RE: OnceLock<Regex> = OnceLock::new();
        let text_re = TEXT_RE.get_or_init(|| {
            extract::compile(
                r#"<a href=".*?critique\.php\?a=[0-9]+"><[iu]>(?P<who>[^<]*)</[iu]></a>&nbsp;.*<img [^>]*>(?P<text>.*?)<b>» Votre avis nous intéresse"#,
            )
        });

        let needle = album_title.to_lowercase();
        if needle.is_empty() {
            return None;
        }

        // Find the matching chronicle first so the borrow of the index is
        // released before fetching
        let matching = self
            .chronicles(session, serie)
            .iter()
            .position(|c| c.title.to_lowercase().contains(&needle))?;

        let (url, cached) = {
            let chronicle = &self.by_serie.get(serie)?[matching];
            (chronicle.url.clone(), chronicle.text.clone())
        };
        if let Some(text) = cached {
            return if text.is_empty() { None } else { Some(text) };
        }

        debug!("fetching critic {}", url);
        let page = session.fetch(&format!("{}/{}", REVIEW_URL, url), Fallback::Full);
        let page = page.replace('\n', "");
        let text = match text_re.captures(&page) {
            Some(caps) => format!(
                "<br/><b>Critique : {}</b>{}",
                &caps["who"], &caps["text"]
            ),
            None => String::new(),
        };
        if let Some(chronicles) = self.by_serie.get_mut(serie) {
            chronicles[matching].text = Some(text.clone());
        }
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// The album rating lives in a separate frame, out of ten with one decimal
fn fetch_note(session: &mut FetchSession, frame_path: &str) -> String {
    static NOTE_RE: OnceLock<Regex> = OnceLock::new();
    let re = NOTE_RE.get_or_init(|| {
        extract::compile(
            r#"<p class="static">Note: <strong> ([0-9]+)\.([0-9]?)</strong>/10 \([0-9]+ votes?\)"#,
        )
    });
    let page = session.fetch(&format!("{}/{}", BASE_URL, frame_path), Fallback::Full);
    let Some(caps) = re.captures(&page) else {
        return String::new();
    };
    let whole: u32 = caps[1].parse().unwrap_or(0);
    let decimal: u32 = caps[2].parse().unwrap_or(0);
    let rounded = if decimal >= 5 { whole + 1 } else { whole };
    rounded.to_string()
}

fn new_document() -> TellicoDoc {
    let mut doc = TellicoDoc::new(CollectionKind::Comics, "My Comics");
    doc.add_field(FieldDef::new("artist", "Dessinateur", "7", "Général", "2", "1"));
    doc.add_field(FieldDef::new("coloriste", "Coloriste", "7", "Général", "2", "1"));
    doc.add_field(
        FieldDef::new("isbn", "ISBN", "0", "Publication", "4", "1").description("Numéro ISBN"),
    );
    doc.add_field(
        FieldDef::new("estimation", "Estimation", "0", "Classification", "4", "1")
            .description("Cote de l'exemplaire"),
    );
    doc.add_field(
        FieldDef::new("depotlegal", "Dépot légal", "0", "Publication", "4", "1")
            .description("Dépot légal"),
    );
    doc.add_field(
        FieldDef::new("acheveimprimer", "Achevé d'imprimer", "0", "Publication", "4", "1")
            .description("Date d'impression"),
    );
    doc.add_field(
        FieldDef::new(
            "back",
            "Quatrième de couverture",
            "0",
            "Quatrième de couverture",
            "4",
            "10",
        )
        .description("Quatrième de couverture"),
    );
    doc.add_field(FieldDef::new("planche", "Planche", "0", "Planche", "4", "10").description("Planche"));
    doc.add_field(FieldDef::new("class-int", "Intégrale", "2", "Classification", "4", "4"));
    doc.add_field(FieldDef::new("class-eo", "Édition Originale", "2", "Classification", "4", "4"));
    doc.add_field(FieldDef::new("class-tt", "Tirage de Tête", "2", "Classification", "4", "4"));
    doc.add_field(FieldDef::new("class-br", "Broché", "2", "Classification", "4", "4"));
    doc.add_field(FieldDef::new("class-tl", "Tirage Limité", "2", "Classification", "4", "4"));
    doc.add_field(
        FieldDef::new("lien-bel", "Lien BEL", "0", "Classification", "4", "7")
            .description("URL de la page de la Base En Ligne de bedetheque.com de cet album"),
    );
    doc.add_field(
        FieldDef::new("note", "Note", "0", "Personnel", "4", "14")
            .description("Avis sur l'album")
            .prop("minimum", "0")
            .prop("maximum", "10"),
    );
    doc
}

fn add_entry(doc: &mut TellicoDoc, record: &AlbumRecord, images: &[(&str, Option<String>)]) {
    // The site writes its Latin-1 accents as entities
    let decoded = |value: &str| extract::decode_entities(value);

    let mut entry = Entry::new();
    entry.field("title", &decoded(&record.title));
    entry.field("series", &decoded(&record.serie));
    entry.field("issue", &record.issue);
    entry.field("depotlegal", &record.depotlegal);
    entry.field("pub_year", &record.year);
    entry.field("acheveimprimer", &record.acheveimprimer);
    entry.field("writer", &decoded(&record.writer));
    entry.field("artist", &decoded(&record.dessin));
    entry.field("coloriste", &decoded(&record.coloriste));
    entry.field("publisher", &decoded(&record.publisher));
    entry.field("edition", &decoded(&record.collec));
    entry.field("isbn", &record.isbn);
    entry.field("pages", &record.pages);
    entry.field("estimation", &decoded(&record.cote));
    entry.field("note", &record.note);
    entry.field("lien-bel", &record.link);
    entry.flag("class-int", record.class_int);
    entry.flag("class-eo", record.class_eo);
    entry.flag("class-tt", record.class_tt);
    entry.flag("class-br", record.class_br);
    entry.flag("class-tl", record.class_tl);

    let mut comments = Vec::new();
    if !record.synopsis.is_empty() {
        comments.push(format!("<b>Synopsis série : </b>{}", record.synopsis));
    }
    if !record.infos.is_empty() {
        comments.push(format!("<b>Infos édition : </b>{}", record.infos));
    }
    if !record.texte_chronique.is_empty() {
        comments.push(record.texte_chronique.clone());
    }
    entry.field("comments", &decoded(&comments.join("<br/>")));

    for (field, id) in images {
        if let Some(id) = id {
            entry.field(field, id);
        }
    }
    doc.add_entry(entry);
}

/// Swaps full-size image directories for their thumbnail counterparts
fn thumbnail_path(field: &str, path: &str) -> String {
    let (from, to) = match field {
        "cover" => ("Couvertures/", "thb_couv/"),
        "back" => ("Versos/", "thb_versos/"),
        _ => ("Planches/", "thb_planches/"),
    };
    path.replacen(from, to, 1)
}

struct Search {
    title: String,
    author: String,
    isbn: String,
    dl: String,
    link: String,
    reeditions: bool,
}

fn search_url(search: &Search) -> String {
    let path = SEARCH_PATH
        .replace("{text}", "")
        .replace("{serie}", &urlquote(&search.title))
        .replace("{author}", &urlquote(&search.author))
        .replace("{isbn}", &urlquote(&search.isbn))
        .replace("{dl}", &urlquote(&search.dl));
    let reeditions = if search.reeditions { "&Reeditions=on" } else { "" };
    format!("{}{}{}", BASE_URL, path, reeditions)
}

/// Runs one search pass; returns the number of entries added
fn run_search(
    search: &Search,
    args: &BedethequeArgs,
    session: &mut FetchSession,
    critics: &mut CriticIndex,
    doc: &mut TellicoDoc,
) -> Result<usize> {
    static DIRECT_RE: OnceLock<Regex> = OnceLock::new();
    let direct_re = DIRECT_RE.get_or_init(|| {
        extract::compile(r"http://www\.bedetheque\.com/(album-([0-9]*)-.*?\.html)")
    });

    let links = if let Some(caps) = direct_re.captures(&search.link) {
        // The album is known; skip the search
        let mut links = BTreeMap::new();
        links.insert(
            caps[2].to_string(),
            AlbumLink {
                url: caps[1].to_string(),
                title: search.title.clone(),
                serie: String::new(),
                issues: vec![(search.dl.clone(), String::new())],
            },
        );
        links
    } else {
        let page = session.fetch(&search_url(search), Fallback::NoCache);
        search_links(&page)
    };

    let album_count = links.len();
    info!("{} album(s)", album_count);
    let no_images = (args.limit != -1 && album_count as i64 > args.limit)
        || (args.limit == -1 && album_count > 30);
    if no_images {
        info!("album count exceeds the limit, images will not be fetched");
    }

    // Past the fast threshold only the search listing itself is emitted
    if args.fast > 0 && album_count as i64 > args.fast {
        let mut added = 0;
        for link in links.values() {
            for (dl, issue) in &link.issues {
                let mut record = AlbumRecord {
                    title: link.title.clone(),
                    serie: link.serie.clone(),
                    issue: leading_digits(issue),
                    link: format!("{}/{}", BASE_URL, link.url),
                    ..AlbumRecord::default()
                };
                if let Some((month, year)) = month_year(dl) {
                    record.depotlegal = format!("{}/{}", year, month);
                    record.month = month;
                    record.year = year;
                }
                add_entry(doc, &record, &[]);
                added += 1;
            }
        }
        return Ok(added);
    }

    let mut added = 0;
    for link in links.values() {
        let url = format!("{}/{}", BASE_URL, link.url);
        debug!("fetching {}", url);
        let page = session.fetch(&url, Fallback::Full);
        if page.is_empty() {
            continue;
        }

        let (mut serie, mut title, mut issue) = page_heading(&page);
        if serie.is_empty() {
            serie = link.serie.clone();
        }
        if title.is_empty() {
            title = link.title.clone();
        }
        if issue.is_empty() {
            if let Some((_, first_issue)) = link.issues.first() {
                issue = leading_digits(first_issue);
            }
        }

        let blocks = edition_blocks(&page);
        debug!("{} edition(s) on the page", blocks.len());
        let mut original: Option<AlbumRecord> = None;

        for (index, block) in blocks.iter().enumerate() {
            if index > 0 && !search.reeditions {
                break;
            }
            let mut record = AlbumRecord::default();
            extract::run_rules(&album_rules(), &normalize_block(block), &mut record);
            record.serie = serie.clone();
            record.title = title.clone();
            record.issue = issue.clone();
            record.link = url.clone();
            if !record.note_frame.is_empty() && record.note.is_empty() {
                record.note = fetch_note(session, &record.note_frame);
            }

            match &original {
                None => {
                    if !args.no_critics {
                        if let Some(text) = critics.critic_for(session, &record.serie, &record.title)
                        {
                            record.texte_chronique = text;
                        }
                    }
                    original = Some(record.clone());
                }
                Some(original) => inherit_from_original(&mut record, original),
            }

            let mut images: Vec<(&str, Option<String>)> = Vec::new();
            for (field, paths) in [
                ("cover", &record.cover),
                ("back", &record.back),
                ("planche", &record.planche),
            ] {
                if paths.is_empty() || no_images {
                    images.push((field, None));
                    continue;
                }
                let first = paths.split(';').next().unwrap_or_default();
                let path = if args.thumbnails {
                    thumbnail_path(field, first)
                } else {
                    first.to_string()
                };
                let fetched = image::fetch(session.client(), &format!("{}/{}", BASE_URL, path));
                images.push((field, fetched.map(|img| doc.add_image(img))));
            }

            add_entry(doc, &record, &images);
            added += 1;
        }
    }
    Ok(added)
}

/// Runs the search and returns the document instead of printing it
pub fn build(args: &BedethequeArgs, session: &mut FetchSession) -> Result<TellicoDoc> {
    let mut doc = new_document();
    let mut critics = CriticIndex::default();

    let author = args
        .author
        .as_deref()
        .unwrap_or_default()
        .split([',', ' '])
        .next()
        .unwrap_or_default()
        .to_string();
    let mut search = Search {
        title: normalize_title(args.title.as_deref().unwrap_or_default()),
        author,
        isbn: args.isbn.clone().unwrap_or_default(),
        dl: normalize_dl(args.dl.as_deref().unwrap_or_default()),
        link: args.link.clone().unwrap_or_default(),
        reeditions: args.reeditions,
    };

    let mut count = run_search(&search, args, session, &mut critics, &mut doc)?;
    if count == 0 && (!search.isbn.is_empty() || !search.dl.is_empty()) {
        // ISBN and legal-deposit indexes are spotty; retry on the rest of
        // the criteria with reeditions included
        info!("no album found from ISBN/DL, retrying without them");
        search.isbn.clear();
        search.dl.clear();
        search.reeditions = true;
        count = run_search(&search, args, session, &mut critics, &mut doc)?;
    }
    info!("{} album(s) found", count);

    Ok(doc)
}

pub fn run(args: &BedethequeArgs, session: &mut FetchSession) -> Result<()> {
    let doc = build(args, session)?;
    session.report();
    doc.print()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_deposit_dates_normalize_to_month_first() {
        assert_eq!(normalize_dl("01/2009"), "01/2009");
        assert_eq!(normalize_dl("2009/01"), "01/2009");
        assert_eq!(normalize_dl(" 2009/01 "), "01/2009");
        assert_eq!(normalize_dl("junk"), "junk");
    }

    #[test]
    fn month_and_year_split_out_of_a_deposit_date() {
        assert_eq!(
            month_year("01/2009"),
            Some(("01".to_string(), "2009".to_string()))
        );
        assert_eq!(month_year("2009"), None);
    }

    #[test]
    fn titles_lose_sort_prefixes_and_serie_echoes() {
        assert_eq!(normalize_title("B12. La Marque Jaune"), "La Marque Jaune");
        assert_eq!(normalize_title(";L'Intégrale"), "L'Intégrale");
        assert_eq!(normalize_title("Tome 2;Le Lotus Bleu"), "Le Lotus Bleu");
        assert_eq!(normalize_title("Astérix;"), "");
        assert_eq!(normalize_title("Le Lotus Bleu"), "Le Lotus Bleu");
    }

    #[test]
    fn search_rows_group_editions_under_one_album() {
        let page = concat!(
            r#"<TD><A HREF="album-100-tintin.html" class="x"><i>Tintin</i> -2- Le Lotus Bleu</A></TD><TD class="d">10/1946</TD></tr>"#,
            "\n",
            r#"<TD><A HREF="album-100-tintin.html" class="x"><i>Tintin</i> -2- Le Lotus Bleu</A></TD><TD class="d">03/1999</TD></tr>"#,
            "\n",
            r#"<TD><A HREF="album-200-jojo.html" class="x"><i>Jojo (Geerts)</i> Un été du tonnerre</A></TD><TD class="d">05/2004</TD></tr>"#,
        );
        let links = search_links(page);
        assert_eq!(links.len(), 2);
        let tintin = &links["100"];
        assert_eq!(tintin.title, "Le Lotus Bleu");
        assert_eq!(tintin.serie, "Tintin");
        assert_eq!(tintin.issues.len(), 2);
        assert_eq!(tintin.issues[0].0, "10/1946");
        // Parenthesized disambiguators are stripped from the serie
        assert_eq!(links["200"].serie, "Jojo");
    }

    #[test]
    fn edition_fields_extract_from_a_block() {
        let block = r#"
<td align="left" valign="top" WIDTH="250"><div class="img-shadow">
<A HREF="Couvertures/lotusbleu.jpg"><IMG SRC="x"></A>
<table>
<tr><td>Dessin :</td><td><A HREF="auteur-1.html">Hergé</A></td></tr>
<tr><td>Scénario :</td><td><A HREF=auteur-1.html>Hergé</A></td></tr>
<tr><td>Couleurs :</td><td><A HREF="a.html">Studios Hergé</A></td></tr>
<tr><td>Editeur :</td><td>Casterman</td></tr>
<tr><td>Collection : </td><td>Les Aventures de Tintin</td></tr>
<tr><td>ISBN :</td><td>2-203-00104-2</td></tr>
<tr><td>Planches :</td><td>62</td></tr>
<tr><td>Estimation :</td><td>15 euros</td></tr>
<tr><td>Dépot légal :</td><td>03/1999</td></tr>
</table>
<IMG SRC="images/Edo.png">
<b>Info édition : </b><i>Réédition fac-similé</i></div>
<a href="Versos/lotusbleu_v.jpg">verso</a>
<div id="ErreurAlbum"#;
        let mut record = AlbumRecord::default();
        extract::run_rules(&album_rules(), &normalize_block(block), &mut record);
        assert_eq!(record.dessin, "Hergé");
        assert_eq!(record.writer, "Hergé");
        assert_eq!(record.coloriste, "Studios Hergé");
        assert_eq!(record.publisher, "Casterman");
        assert_eq!(record.collec, "Les Aventures de Tintin");
        assert_eq!(record.isbn, "2-203-00104-2");
        assert_eq!(record.pages, "62");
        assert_eq!(record.cote, "15 euros");
        assert_eq!(record.depotlegal, "1999/03");
        assert_eq!(record.year, "1999");
        assert_eq!(record.month, "03");
        assert_eq!(record.infos, "Réédition fac-similé");
        assert_eq!(record.cover, "Couvertures/lotusbleu.jpg");
        assert_eq!(record.back, "Versos/lotusbleu_v.jpg");
        assert!(record.class_eo);
        assert!(!record.class_int);
    }

    #[test]
    fn split_contributor_rows_join_with_semicolons() {
        let block = concat!(
            r#"<tr><td>Dessin :</td><td><A HREF="a.html">Uderzo</a></td></tr><tr><td></td><td><a href="b.html">Goscinny</A></td></tr>"#
        );
        let normalized = normalize_block(block);
        let mut record = AlbumRecord::default();
        extract::run_rules(&album_rules(), &normalized, &mut record);
        assert_eq!(record.dessin, "Uderzo;Goscinny");
    }

    #[test]
    fn alternate_patterns_only_fill_gaps() {
        let block = r#"<tr><td>Editeur :</td><td><a href="e.html">Dargaud</a></td></tr>"#;
        let mut record = AlbumRecord::default();
        extract::run_rules(&album_rules(), &normalize_block(block), &mut record);
        assert_eq!(record.publisher, "Dargaud");
    }

    #[test]
    fn reeditions_inherit_missing_fields_only() {
        let original = AlbumRecord {
            title: "Le Lotus Bleu".to_string(),
            serie: "Tintin".to_string(),
            issue: "2".to_string(),
            publisher: "Casterman".to_string(),
            isbn: "2-203-00104-2".to_string(),
            texte_chronique: "<b>Critique</b>".to_string(),
            ..AlbumRecord::default()
        };
        let mut reedition = AlbumRecord {
            publisher: "Casterman Poche".to_string(),
            depotlegal: "1999/03".to_string(),
            ..AlbumRecord::default()
        };
        inherit_from_original(&mut reedition, &original);
        // Its own publisher wins, the missing ISBN comes from the original
        assert_eq!(reedition.publisher, "Casterman Poche");
        assert_eq!(reedition.isbn, "2-203-00104-2");
        // Identity fields always mirror the original
        assert_eq!(reedition.title, "Le Lotus Bleu");
        assert_eq!(reedition.serie, "Tintin");
        assert_eq!(reedition.texte_chronique, "<b>Critique</b>");
        // And its own dates survive
        assert_eq!(reedition.depotlegal, "1999/03");
    }

    #[test]
    fn thumbnails_swap_image_directories() {
        assert_eq!(
            thumbnail_path("cover", "Couvertures/x.jpg"),
            "thb_couv/x.jpg"
        );
        assert_eq!(thumbnail_path("back", "Versos/x.jpg"), "thb_versos/x.jpg");
        assert_eq!(
            thumbnail_path("planche", "Planches/x.jpg"),
            "thb_planches/x.jpg"
        );
    }

    #[test]
    fn classification_flags_serialize_as_presence() {
        let mut doc = new_document();
        let record = AlbumRecord {
            title: "Le Lotus Bleu".to_string(),
            class_eo: true,
            ..AlbumRecord::default()
        };
        add_entry(&mut doc, &record, &[]);
        let xml = doc.render().unwrap();
        assert!(xml.contains("<class-eo>true</class-eo>"));
        assert!(!xml.contains("<class-int>"));
    }
}
