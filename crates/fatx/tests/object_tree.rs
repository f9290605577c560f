mod common;

use std::io::Cursor;

use chrono::NaiveDate;
use common::*;
use fatx::{Error, FatxObject, Node, Volume};

fn sample_volume() -> Volume {
    Volume::open(Cursor::new(sample_image())).expect("open volume")
}

#[test]
fn ls_hides_deleted_entries_unless_asked() {
    let root = sample_volume().root();

    let visible = root.ls("/", false).expect("ls");
    assert!(visible.iter().all(|node| !node.is_deleted()));
    assert!(!names(&visible).contains(&"old.txt".to_owned()));

    let all = root.ls("/", true).expect("ls with deleted");
    assert_eq!(names(&all), vec![XBE_NAME, "saves", "old.txt", "empty.bin"]);
    let old = all.iter().find(|node| node.name() == "old.txt").expect("old.txt");
    assert!(old.is_deleted());
    assert!(old.details().expect("details").attributes["deleted"]);
}

#[test]
fn ls_accepts_a_path_relative_to_the_node() {
    let root = sample_volume().root();
    assert_eq!(names(&root.ls("saves", false).expect("ls")), vec!["profile", "notes.txt"]);
    assert_eq!(
        names(&root.ls("saves/profile/", false).expect("ls")),
        vec!["settings.bin"]
    );

    let saves = root.get("saves").expect("get saves");
    assert_eq!(names(&saves.ls("profile", false).expect("ls")), vec!["settings.bin"]);
}

#[test]
fn get_normalizes_separators() {
    let root = sample_volume().root();

    let plain = root.get("saves/profile").expect("get");
    assert_eq!(root.get("saves//profile/").expect("get"), plain);
    assert_eq!(root.get("/saves/profile").expect("get"), plain);

    assert_eq!(root.get("").expect("get empty"), root);
    assert_eq!(root.get("/").expect("get slash"), root);
    assert_eq!(plain.get("").expect("get self"), plain);

    let file = root.get(XBE_NAME).expect("get file");
    assert_eq!(file.get("/").expect("file get self"), file);
}

#[test]
fn missing_paths_are_reported() {
    let root = sample_volume().root();
    assert!(matches!(root.get("nope"), Err(Error::PathNotFoundError(_))));
    assert!(matches!(
        root.get("saves/nope/deeper"),
        Err(Error::PathNotFoundError(_))
    ));
    assert!(matches!(root.ls("nope", false), Err(Error::PathNotFoundError(_))));
}

#[test]
fn paths_and_parents() {
    let root = sample_volume().root();
    let settings = root.get("saves/profile/settings.bin").expect("get");
    assert_eq!(settings.path(), "/saves/profile/settings.bin");

    let profile = settings.parent();
    assert_eq!(profile, root.get("saves/profile").expect("get profile"));
    assert_eq!(profile.parent().parent(), root);
    assert_eq!(root.path(), "/");
    assert_eq!(root.name(), "/");
    assert_eq!(root.to_string(), "/");
}

#[test]
fn root_refuses_entry_operations() {
    let mut root = sample_volume().root();

    assert!(matches!(root.rename("x"), Err(Error::InvalidOperationError(_))));
    assert!(matches!(root.delete(), Err(Error::InvalidOperationError(_))));
    assert!(matches!(root.details(), Err(Error::InvalidOperationError(_))));
    assert!(matches!(root.export_file(), Err(Error::NotAFileError(_))));
    assert_eq!(root.parent(), root);
    assert!(matches!(root, Node::Root(_)));
}

#[test]
fn files_and_directories_refuse_the_other_kind_of_operation() {
    let root = sample_volume().root();
    let file = root.get("saves/notes.txt").expect("get file");
    let directory = root.get("saves").expect("get directory");

    assert!(matches!(file.ls("", false), Err(Error::NotADirectoryError(_))));
    assert!(matches!(file.get("child"), Err(Error::NotADirectoryError(_))));
    assert!(matches!(
        file.import_data("child", b"data"),
        Err(Error::NotADirectoryError(_))
    ));
    assert!(matches!(
        root.get("saves/notes.txt/child"),
        Err(Error::NotADirectoryError(_))
    ));
    assert!(matches!(directory.export_file(), Err(Error::NotAFileError(_))));
    assert!(matches!(root.ls("saves/notes.txt", false), Err(Error::NotADirectoryError(_))));
}

#[test]
fn export_truncates_the_last_cluster() {
    let volume = sample_volume();
    let file = volume.root().get(XBE_NAME).expect("get file");

    let entry = file.entry().expect("entry");
    assert_eq!(entry.size as usize, 2 * 512 + 10);
    assert_eq!(volume.chain(entry.start_cluster).expect("chain").len(), 3);

    let data = file.export_file().expect("export");
    assert_eq!(data, payload(2 * 512 + 10));
}

#[test]
fn empty_file_exports_nothing() {
    let file = sample_volume().root().get("empty.bin").expect("get file");
    assert_eq!(file.entry().expect("entry").start_cluster, 0);
    assert!(file.export_file().expect("export").is_empty());
}

#[test]
fn exporting_a_deleted_file_fails() {
    let root = sample_volume().root();
    let old = root
        .ls("", true)
        .expect("ls")
        .into_iter()
        .find(|node| node.name() == "old.txt")
        .expect("old.txt");
    assert!(matches!(old.export_file(), Err(Error::PathNotFoundError(_))));
}

#[test]
fn details_describe_the_entry() {
    let root = sample_volume().root();
    let details = root.get("saves/notes.txt").expect("get").details().expect("details");

    assert_eq!(details.name, "notes.txt");
    assert_eq!(details.size as usize, NOTES.len());
    assert!(!details.attributes["directory"]);
    assert!(!details.attributes["deleted"]);
    let stamp = NaiveDate::from_ymd_opt(2005, 6, 7)
        .and_then(|date| date.and_hms_opt(12, 0, 0))
        .expect("valid date");
    assert_eq!(details.created, Some(stamp));
    assert_eq!(details.modified, Some(stamp));

    let json = serde_json::to_value(&details).expect("serialize");
    assert_eq!(json["name"], "notes.txt");
    assert_eq!(json["accessed"], "2005-06-07 12:00:00");
    assert_eq!(json["attributes"]["directory"], false);

    let saves = root.get("saves").expect("get").details().expect("details");
    assert!(saves.attributes["directory"]);
}

#[test]
fn live_entry_wins_over_a_deleted_twin() {
    let mut builder = ImageBuilder::new(256 * 1024, 1);
    builder.add_deleted_file(ROOT_CLUSTER, 0, "save.dat", 4);
    builder.add_file(ROOT_CLUSTER, 1, "save.dat", b"live");
    let volume = Volume::open(Cursor::new(builder.finish())).expect("open volume");
    let root = volume.root();

    let listed = root.ls("", false).expect("ls");
    assert_eq!(names(&listed), vec!["save.dat"]);
    for node in &listed {
        assert_eq!(&root.get(&node.path()).expect("resolve"), node);
    }

    let live = root.get("save.dat").expect("get");
    assert!(!live.is_deleted());
    assert_eq!(live.location().expect("location").slot, 1);
    assert_eq!(live.export_file().expect("export"), b"live");

    let all = root.ls("", true).expect("ls with deleted");
    assert_eq!(all.len(), 2);
    assert!(all[0].is_deleted());
}

#[test]
fn deleted_record_resolves_when_no_live_twin_exists() {
    let root = sample_volume().root();
    let old = root.get("old.txt").expect("get deleted");
    assert!(old.is_deleted());
    assert_eq!(old.location().expect("location").slot, 2);
}
