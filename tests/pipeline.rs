//! End-to-end pipeline tests against a real on-disk Griffith database
//!
//! The Griffith source is the one pipeline that runs without network
//! access, so it doubles as the full-stack check: SQLite rows in, a
//! well-formed Tellico document with embedded posters out.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bibfetch::sources::griffith::{self, GriffithArgs};
use rusqlite::Connection;
use std::path::Path;

const POSTER_BYTES: &[u8] = b"\xff\xd8\xff\xe0 not really a jpeg \x00\x01\x02\x03";

fn create_database(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "
        CREATE TABLE movies (
            movie_id INTEGER PRIMARY KEY,
            title TEXT, director TEXT, rating INTEGER, year INTEGER,
            region TEXT, country TEXT, genre TEXT, classification TEXT,
            plot TEXT, runtime INTEGER, o_title TEXT, studio TEXT,
            notes TEXT, image TEXT, [cast] TEXT, loaned TEXT, color TEXT,
            site TEXT, medium_id INTEGER
        );
        CREATE TABLE media (medium_id INTEGER PRIMARY KEY, name TEXT);
        CREATE TABLE tags (tag_id INTEGER PRIMARY KEY, name TEXT);
        CREATE TABLE movie_tag (movie_id INTEGER, tag_id INTEGER);
        CREATE TABLE languages (lang_id INTEGER PRIMARY KEY, name TEXT);
        CREATE TABLE movie_lang (movie_id INTEGER, lang_id INTEGER);
        INSERT INTO media VALUES (1, 'DVD');
        INSERT INTO movies VALUES (
            3, 'Stalker', 'Andrei Tarkovsky', 10, 1979, NULL, 'USSR',
            'Sci-Fi', NULL, 'The Zone.', 161, 'Сталкер', 'Mosfilm',
            NULL, 'poster3', 'Alexander Kaidanovsky as Stalker', '0', '2',
            NULL, 1
        );
    ",
    )
    .unwrap();
}

#[test]
fn a_database_on_disk_becomes_a_tellico_document() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("griffith.db");
    let posters = dir.path().join("posters");
    std::fs::create_dir(&posters).unwrap();
    std::fs::write(posters.join("poster3.jpg"), POSTER_BYTES).unwrap();
    create_database(&db_path);

    let args = GriffithArgs {
        database: Some(db_path),
        posters: Some(posters),
        no_images: false,
    };
    let xml = griffith::build(&args).unwrap().render().unwrap();

    assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
    assert!(xml.contains(r#"<collection title="Griffith Import" type="3">"#));
    assert!(xml.contains(r#"<entry id="3">"#));
    assert!(xml.contains("<title>Stalker</title>"));
    assert!(xml.contains("<orig-title>Сталкер</orig-title>"));
    assert!(xml.contains("<color>Black &amp; White</color>"));
    assert!(xml.contains(
        "<casts><cast><column>Alexander Kaidanovsky</column><column>Stalker</column></cast></casts>"
    ));
    assert!(xml.contains("<cover>poster3.jpg</cover>"));

    // The embedded poster decodes back to the original file bytes
    let open = r#"<image format="JPEG" id="poster3.jpg">"#;
    let start = xml.find(open).expect("poster payload present") + open.len();
    let end = xml[start..].find("</image>").unwrap() + start;
    assert_eq!(STANDARD.decode(&xml[start..end]).unwrap(), POSTER_BYTES);
}

#[test]
fn an_empty_database_still_yields_a_valid_document() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("griffith.db");
    create_database(&db_path);
    let conn = Connection::open(&db_path).unwrap();
    conn.execute("DELETE FROM movies", []).unwrap();
    drop(conn);

    let args = GriffithArgs {
        database: Some(db_path),
        posters: Some(dir.path().join("posters")),
        no_images: true,
    };
    let xml = griffith::build(&args).unwrap().render().unwrap();

    assert!(xml.contains(r#"<collection title="Griffith Import" type="3">"#));
    assert!(xml.contains(r#"<field name="_default"/>"#));
    assert!(!xml.contains("<entry"));
    assert!(xml.contains("</tellico>"));
}

#[test]
fn posters_can_be_left_out() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("griffith.db");
    let posters = dir.path().join("posters");
    std::fs::create_dir(&posters).unwrap();
    std::fs::write(posters.join("poster3.jpg"), POSTER_BYTES).unwrap();
    create_database(&db_path);

    let args = GriffithArgs {
        database: Some(db_path),
        posters: Some(posters),
        no_images: true,
    };
    let xml = griffith::build(&args).unwrap().render().unwrap();
    assert!(!xml.contains("<cover>"));
    assert!(xml.contains("<images></images>"));
}
