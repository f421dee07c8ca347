//! File discovery and command synthesis against an on-disk data tree.

use std::fs;
use std::path::Path;

use regex::Regex;
use tempfile::TempDir;

use feedpipe_core::{synthesize, Feed, FileLocator, Importer, Ledger, Manifest};

fn touch(root: &Path, rel: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, b"x").unwrap();
}

struct Fixture {
    _tmp: TempDir,
    root: std::path::PathBuf,
    locator: FileLocator,
    ledger: Ledger,
}

fn fixture() -> Fixture {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("data");
    let ledger = Ledger::new(tmp.path().join("log.json"));
    Fixture {
        locator: FileLocator::new(&root),
        root,
        ledger,
        _tmp: tmp,
    }
}

fn feed_with_importer(id: &str, template: &str) -> Feed {
    let mut feed = Feed::new(id);
    feed.importers = vec![Importer::parse(template).unwrap()];
    feed
}

#[test]
fn out_of_order_file_is_resurfaced() {
    // GIVEN buckets 2017_01..03 and a ledger recording only 2017_02
    let fx = fixture();
    for b in ["2017_01", "2017_02", "2017_03"] {
        touch(&fx.root, &format!("adqs/{b}/adqs.csv"));
    }
    let recorded = fx.root.join("adqs/2017_02/adqs.csv");
    fx.ledger.append("adqs", &recorded.to_string_lossy()).unwrap();

    // WHEN looking for unimported files
    let pattern = Regex::new(r"adqs\.csv").unwrap();
    let files = fx
        .locator
        .unimported_files(&Feed::new("adqs"), &pattern, &fx.ledger)
        .unwrap();

    // THEN both the older and the newer bucket are reported
    let buckets: Vec<&str> = files.iter().map(|f| f.bucket()).collect();
    assert_eq!(buckets, vec!["2017_01", "2017_03"]);
}

#[test]
fn fully_recorded_feed_has_nothing_to_import() {
    let fx = fixture();
    let feed = feed_with_importer("bnf_codes", r"import_bnf_codes --filename bnf_codes\.csv");
    for b in ["2017_01", "2017_02"] {
        touch(&fx.root, &format!("bnf_codes/{b}/bnf_codes.csv"));
        let file = fx.root.join(format!("bnf_codes/{b}/bnf_codes.csv"));
        fx.ledger.append("bnf_codes", &file.to_string_lossy()).unwrap();
    }

    let pattern = feed.importers[0].pattern();
    assert!(fx
        .locator
        .unimported_files(&feed, pattern, &fx.ledger)
        .unwrap()
        .is_empty());
    assert!(synthesize(&feed, &fx.locator, &fx.ledger).unwrap().is_empty());
}

#[test]
fn always_import_ignores_the_ledger() {
    let fx = fixture();
    let mut feed = feed_with_importer("practices", "import_practices --epraccur epraccur.csv");
    feed.always_import = true;
    touch(&fx.root, "practices/2017_01/epraccur.csv");
    touch(&fx.root, "practices/2017_02/epraccur.csv");
    let file = fx.root.join("practices/2017_02/epraccur.csv");
    fx.ledger.append("practices", &file.to_string_lossy()).unwrap();

    let commands = synthesize(&feed, &fx.locator, &fx.ledger).unwrap();
    assert_eq!(commands.len(), 2);
}

#[test]
fn records_of_other_importers_do_not_count() {
    // GIVEN a raw file already imported, and its formatted sibling not yet
    let fx = fixture();
    touch(&fx.root, "prescribing/2017_01/T201701PDPI+BNFT.CSV");
    touch(&fx.root, "prescribing/2017_01/T201701PDPI+BNFT_formatted.CSV");
    let raw = fx.root.join("prescribing/2017_01/T201701PDPI+BNFT.CSV");
    fx.ledger.append("prescribing", &raw.to_string_lossy()).unwrap();

    let feed = feed_with_importer(
        "prescribing",
        r"import_hscic_prescribing --filename T\d+PDPI\+BNFT_formatted\.CSV$",
    );

    // WHEN synthesizing
    let commands = synthesize(&feed, &fx.locator, &fx.ledger).unwrap();

    // THEN the formatted file still needs importing
    assert_eq!(commands.len(), 1);
    assert!(commands[0].command.contains("T201701PDPI+BNFT_formatted.CSV"));
}

#[test]
fn synthesized_command_names_the_file() {
    let fx = fixture();
    touch(&fx.root, "adqs/2017_01/adqs 2017.csv");
    let feed = feed_with_importer("adqs", "import_adqs --filename adqs.*csv -v 2");

    let commands = synthesize(&feed, &fx.locator, &fx.ledger).unwrap();

    assert_eq!(commands.len(), 1);
    let expected_path = fx.root.join("adqs/2017_01/adqs 2017.csv");
    assert_eq!(commands[0].file.path(), expected_path.as_path());
    assert_eq!(
        commands[0].command,
        format!("import_adqs --filename '{}' -v 2", expected_path.display())
    );
}

#[test]
fn missing_data_is_nothing_to_do() {
    let fx = fixture();
    let feed = feed_with_importer("ccg", "import_ccg --ccg ccg.*csv");

    assert!(synthesize(&feed, &fx.locator, &fx.ledger).unwrap().is_empty());
}

#[test]
fn commands_follow_importer_then_date_order() {
    let fx = fixture();
    let manifest = Manifest::from_json(
        r#"[{
            "id": "bnf",
            "importers": [
                "import_bnf --filename bnf_.*\\.csv",
                "import_dmd --filename dmd_.*\\.xml"
            ]
        }]"#,
    )
    .unwrap();
    touch(&fx.root, "bnf/2017_02/bnf_b.csv");
    touch(&fx.root, "bnf/2017_01/bnf_a.csv");
    touch(&fx.root, "bnf/2017_01/dmd_a.xml");

    let feed = manifest.feed("bnf").unwrap();
    let commands = synthesize(feed, &fx.locator, &fx.ledger).unwrap();
    let files: Vec<String> = commands
        .iter()
        .map(|c| c.file.path().file_name().unwrap().to_string_lossy().into_owned())
        .collect();

    assert_eq!(files, vec!["bnf_a.csv", "bnf_b.csv", "dmd_a.xml"]);
}
