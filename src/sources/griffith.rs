//! Griffith collection import
//!
//! Reads a local Griffith movie-manager SQLite database and re-emits it as
//! a movie collection, posters included. No network access at all; the only
//! fatal condition is a missing or unreadable database file.

use crate::image::CoverImage;
use crate::output::{CollectionKind, Entry, FieldDef, TellicoDoc};
use crate::{BibError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rusqlite::types::Value;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default media choices Tellico ships with; the database's own media names
/// are appended to these
const DEFAULT_MEDIA: &str = "DVD;VHS;VCD;DivX;Blu-ray;HD DVD";

#[derive(Debug, clap::Args)]
pub struct GriffithArgs {
    /// Griffith database file (defaults to ~/.griffith/griffith.db)
    #[arg(long, value_name = "FILE")]
    pub database: Option<PathBuf>,

    /// Poster directory (defaults to ~/.griffith/posters)
    #[arg(long, value_name = "DIR")]
    pub posters: Option<PathBuf>,

    /// Skip poster embedding
    #[arg(long)]
    pub no_images: bool,
}

fn griffith_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".griffith")
}

/// One row of the movies table, stringified
#[derive(Debug, Default)]
struct GriffithMovie {
    id: i64,
    title: Option<String>,
    director: Option<String>,
    rating: Option<String>,
    year: Option<String>,
    region: Option<String>,
    country: Option<String>,
    genre: Option<String>,
    classification: Option<String>,
    plot: Option<String>,
    runtime: Option<String>,
    original_title: Option<String>,
    studio: Option<String>,
    notes: Option<String>,
    image: Option<String>,
    cast: Option<String>,
    loaned: Option<String>,
    color: Option<String>,
    site: Option<String>,
}

/// Griffith stores integers and reals where Tellico wants text
fn column_text(row: &rusqlite::Row, index: usize) -> rusqlite::Result<Option<String>> {
    Ok(match row.get::<_, Value>(index)? {
        Value::Null | Value::Blob(_) => None,
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(r) => Some(r.to_string()),
        Value::Text(t) => Some(t),
    })
}

fn load_movies(conn: &Connection) -> Result<Vec<GriffithMovie>> {
    let mut stmt = conn.prepare(
        "SELECT movie_id, title, director, rating, year, region, country, genre, \
         classification, plot, runtime, o_title, studio, notes, image, [cast], \
         loaned, color, site FROM movies ORDER BY movie_id",
    )?;
    let movies = stmt
        .query_map([], |row| {
            Ok(GriffithMovie {
                id: row.get(0)?,
                title: column_text(row, 1)?,
                director: column_text(row, 2)?,
                rating: column_text(row, 3)?,
                year: column_text(row, 4)?,
                region: column_text(row, 5)?,
                country: column_text(row, 6)?,
                genre: column_text(row, 7)?,
                classification: column_text(row, 8)?,
                plot: column_text(row, 9)?,
                runtime: column_text(row, 10)?,
                original_title: column_text(row, 11)?,
                studio: column_text(row, 12)?,
                notes: column_text(row, 13)?,
                image: column_text(row, 14)?,
                cast: column_text(row, 15)?,
                loaned: column_text(row, 16)?,
                color: column_text(row, 17)?,
                site: column_text(row, 18)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(movies)
}

fn load_names(conn: &Connection, sql: &str, id: i64) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let names = stmt
        .query_map(params![id], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

fn movie_media(conn: &Connection, id: i64) -> Result<Vec<String>> {
    load_names(
        conn,
        "SELECT name FROM media WHERE medium_id IN \
         (SELECT medium_id FROM movies WHERE movie_id = ?1)",
        id,
    )
}

fn movie_tags(conn: &Connection, id: i64) -> Result<Vec<String>> {
    load_names(
        conn,
        "SELECT name FROM tags WHERE tag_id IN \
         (SELECT tag_id FROM movie_tag WHERE movie_id = ?1)",
        id,
    )
}

fn movie_languages(conn: &Connection, id: i64) -> Result<Vec<String>> {
    load_names(
        conn,
        "SELECT name FROM languages WHERE lang_id IN \
         (SELECT lang_id FROM movie_lang WHERE movie_id = ?1)",
        id,
    )
}

/// The database's media names, appended to the stock choices, deduplicated
fn medium_choices(conn: &Connection) -> Result<String> {
    let mut choices: Vec<String> = DEFAULT_MEDIA.split(';').map(str::to_string).collect();
    let mut stmt = conn.prepare("SELECT name FROM media")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for name in names {
        if !choices.contains(&name) {
            choices.push(name);
        }
    }
    Ok(choices.join(";"))
}

fn slash_list(value: &Option<String>) -> Vec<String> {
    value
        .as_deref()
        .unwrap_or_default()
        .split('/')
        .map(|piece| piece.trim().to_string())
        .filter(|piece| !piece.is_empty())
        .collect()
}

/// Line breaks survive into Tellico as explicit `<br/>`
fn multiline(value: &Option<String>) -> String {
    value.as_deref().unwrap_or_default().replace('\n', "\n<br/>")
}

/// Each cast line is `Actor as Role`
fn cast_rows(value: &Option<String>) -> Vec<Vec<String>> {
    value
        .as_deref()
        .unwrap_or_default()
        .lines()
        .map(|line| {
            line.splitn(2, " as ")
                .map(|piece| piece.trim().to_string())
                .collect()
        })
        .collect()
}

fn poster_for(movie: &GriffithMovie, posters: &Path) -> Option<CoverImage> {
    let name = movie.image.as_deref()?;
    let path = posters.join(format!("{}.jpg", name));
    match std::fs::read(&path) {
        Ok(bytes) => Some(CoverImage {
            id: format!("{}.jpg", name),
            data: STANDARD.encode(bytes),
        }),
        Err(e) => {
            debug!("unable to read poster {}: {}", path.display(), e);
            None
        }
    }
}

fn add_movie(doc: &mut TellicoDoc, conn: &Connection, movie: GriffithMovie, posters: &Path, embed_images: bool) -> Result<()> {
    let mut entry = Entry::new();
    entry.set_id(&movie.id.to_string());

    entry.field("title", movie.title.as_deref().unwrap_or_default());
    entry.field(
        "orig-title",
        movie.original_title.as_deref().unwrap_or_default(),
    );
    entry.field("year", movie.year.as_deref().unwrap_or_default());
    entry.field("rating", movie.rating.as_deref().unwrap_or_default());
    entry.list(
        "directors",
        "director",
        &[movie.director.clone().unwrap_or_default()],
    );
    if let Some(region) = &movie.region {
        entry.field("region", &format!("Region {}", region));
    }
    entry.list(
        "nationalitys",
        "nationality",
        &[movie.country.clone().unwrap_or_default()],
    );
    entry.list("genres", "genre", &slash_list(&movie.genre));
    if let Some(classification) = &movie.classification {
        if !classification.trim().is_empty() {
            entry.field("certification", &format!("{} (USA)", classification));
        }
    }
    entry.field("plot", &multiline(&movie.plot));
    entry.field("running-time", movie.runtime.as_deref().unwrap_or_default());
    entry.list("studios", "studio", &slash_list(&movie.studio));
    entry.field("comments", &multiline(&movie.notes));
    entry.table("casts", "cast", &cast_rows(&movie.cast));
    match movie.loaned.as_deref() {
        None | Some("0") => {}
        Some(loaned) => entry.field("loaned", loaned),
    }
    match movie.color.as_deref() {
        Some("1") => entry.field("color", "Color"),
        Some("2") => entry.field("color", "Black & White"),
        Some(other) => entry.field("color", other),
        None => {}
    }
    entry.field("url", movie.site.as_deref().unwrap_or_default());

    entry.list("mediums", "medium", &movie_media(conn, movie.id)?);
    entry.list("keywords", "keyword", &movie_tags(conn, movie.id)?);
    entry.list("languages", "language", &movie_languages(conn, movie.id)?);

    if embed_images {
        if let Some(poster) = poster_for(&movie, posters) {
            let id = doc.add_image(poster);
            entry.field("cover", &id);
        }
    }

    doc.add_entry(entry);
    Ok(())
}

/// Builds the whole document from an open database
fn import(conn: &Connection, posters: &Path, embed_images: bool) -> Result<TellicoDoc> {
    let mut doc = TellicoDoc::new(CollectionKind::Movies, "Griffith Import");

    doc.add_field(
        FieldDef::new("rating", "Personal Rating", "2", "Personal", "4", "14")
            .i18n()
            .prop("maximum", "10")
            .prop("minimum", "1"),
    );
    doc.add_field(FieldDef::new("orig-title", "Original Title", "8", "General", "1", "1").i18n());
    doc.add_field(FieldDef::new("keyword", "Keywords", "7", "Personal", "4", "1").i18n());
    doc.add_field(FieldDef::new("url", "URL", "0", "General", "4", "7").i18n());
    doc.add_field(
        FieldDef::new("medium", "Medium", "2", "General", "4", "3")
            .i18n()
            .allowed(&medium_choices(conn)?),
    );

    let movies = load_movies(conn)?;
    info!("{} movie(s) in the collection", movies.len());
    for movie in movies {
        add_movie(&mut doc, conn, movie, posters, embed_images)?;
    }
    Ok(doc)
}

/// Opens the database and returns the document instead of printing it
pub fn build(args: &GriffithArgs) -> Result<TellicoDoc> {
    let database = args
        .database
        .clone()
        .unwrap_or_else(|| griffith_dir().join("griffith.db"));
    let posters = args
        .posters
        .clone()
        .unwrap_or_else(|| griffith_dir().join("posters"));

    if !database.is_file() {
        return Err(BibError::MissingDatabase { path: database });
    }
    debug!("opening {}", database.display());
    let conn = Connection::open(&database)?;

    import(&conn, &posters, !args.no_images)
}

pub fn run(args: &GriffithArgs) -> Result<()> {
    build(args)?.print()
}
