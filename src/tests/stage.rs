use crate::{Position, Stage};

#[test]
fn argv_starts_with_program() {
    let stage = Stage::cmd("grep").arg("-i").args(["foo", "bar baz"]);
    assert_eq!(stage.program(), "grep");
    assert_eq!(stage.get_args(), ["-i", "foo", "bar baz"]);
    assert_eq!(stage.argv(), ["grep", "-i", "foo", "bar baz"]);
}

#[test]
fn display() {
    let stage = Stage::cmd("wc").arg("-l");
    assert_eq!(stage.to_string(), "wc -l");
    assert_eq!(format!("{:?}", stage), "Stage { wc -l }");
}

#[test]
fn prepare_rejects_nul() {
    assert!(Stage::cmd("echo").arg("a\0b").prepare(0).is_err());
    assert!(Stage::cmd("ec\0ho").prepare(0).is_err());
}

#[test]
fn prepare_formats_exec_failure() {
    let prepared = Stage::cmd("nosuch").arg("x").prepare(2).unwrap();
    assert_eq!(prepared.index(), 2);
    assert_eq!(prepared.program().to_bytes(), b"nosuch");
    assert_eq!(prepared.exec_failure, b"pipechain: nosuch: cannot execute");
}

#[test]
fn positions() {
    assert_eq!(Position::of(0, 1), Some(Position::Only));
    assert_eq!(Position::of(0, 3), Some(Position::First));
    assert_eq!(Position::of(1, 3), Some(Position::Middle));
    assert_eq!(Position::of(2, 3), Some(Position::Last));

    assert!(Position::First.writes() && !Position::First.reads());
    assert!(Position::Middle.writes() && Position::Middle.reads());
    assert!(!Position::Last.writes() && Position::Last.reads());
    assert!(!Position::Only.writes() && !Position::Only.reads());
}

#[test]
fn position_out_of_range() {
    assert_eq!(Position::of(3, 3), None);
    assert_eq!(Position::of(0, 0), None);
}
