use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use pretty_assertions::assert_eq;
use relocator_classfile::{access, ClassFile};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

fn relocator(cwd: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("relocator"));
    cmd.current_dir(cwd).env_remove("RUST_LOG");
    cmd
}

fn class_bytes(name: &str, interfaces: &[&str]) -> Vec<u8> {
    let mut class = ClassFile::new(
        61,
        access::PUBLIC | access::SUPER,
        name,
        Some("java/lang/Object"),
    );
    class.interfaces = interfaces.iter().map(|i| i.to_string()).collect();
    class.to_bytes().unwrap()
}

fn interfaces_of(bytes: &[u8]) -> Vec<String> {
    ClassFile::parse(bytes).unwrap().interfaces
}

#[test]
fn help_mentions_rewrite() {
    let temp = tempfile::tempdir().unwrap();
    relocator(temp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("rewrite"));
}

#[test]
fn rewrites_a_class_directory_into_output() {
    let temp = tempfile::tempdir().unwrap();
    let input = temp.path().join("classes");
    fs::create_dir_all(input.join("demo")).unwrap();
    fs::write(
        input.join("demo/AuditFilter.class"),
        class_bytes("demo/AuditFilter", &["javax/servlet/Filter"]),
    )
    .unwrap();
    let untouched = class_bytes("demo/Plain", &[]);
    fs::write(input.join("demo/Plain.class"), &untouched).unwrap();
    fs::write(input.join("demo/messages.properties"), "greeting=hi\n").unwrap();
    let output = temp.path().join("out");

    relocator(temp.path())
        .arg("rewrite")
        .arg(&input)
        .arg("-o")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "classes seen: 2, changed: 1, failed: 0",
        ));

    let rewritten = fs::read(output.join("demo/AuditFilter.class")).unwrap();
    assert_eq!(interfaces_of(&rewritten), vec!["jakarta/servlet/Filter"]);
    assert_eq!(fs::read(output.join("demo/Plain.class")).unwrap(), untouched);
    assert_eq!(
        fs::read_to_string(output.join("demo/messages.properties")).unwrap(),
        "greeting=hi\n"
    );
    // The input is left alone when an output is given.
    let original = fs::read(input.join("demo/AuditFilter.class")).unwrap();
    assert_eq!(interfaces_of(&original), vec!["javax/servlet/Filter"]);
}

#[test]
fn rewrites_a_jar_in_place_with_flag_relocations_and_dump() {
    let temp = tempfile::tempdir().unwrap();
    let jar = temp.path().join("app.jar");
    {
        let mut writer = ZipWriter::new(File::create(&jar).unwrap());
        let options = SimpleFileOptions::default();
        writer.add_directory("META-INF/", options).unwrap();
        writer.start_file("META-INF/MANIFEST.MF", options).unwrap();
        writer.write_all(b"Manifest-Version: 1.0\n").unwrap();
        writer.start_file("demo/Mailer.class", options).unwrap();
        writer
            .write_all(&class_bytes("demo/Mailer", &["javax/mail/Transport", "javax/servlet/Filter"]))
            .unwrap();
        writer.finish().unwrap();
    }
    let dump = temp.path().join("dump");

    relocator(temp.path())
        .arg("rewrite")
        .arg(&jar)
        .args(["--relocate", "javax.mail=jakarta.mail", "--fast", "--dump"])
        .arg(&dump)
        .assert()
        .success()
        .stdout(predicate::str::contains("changed: 1"));

    let mut archive = ZipArchive::new(File::open(&jar).unwrap()).unwrap();
    let names: Vec<String> = archive.file_names().map(str::to_owned).collect();
    assert!(names.contains(&"META-INF/".to_owned()));
    assert!(names.contains(&"META-INF/MANIFEST.MF".to_owned()));
    let mut bytes = Vec::new();
    archive
        .by_name("demo/Mailer.class")
        .unwrap()
        .read_to_end(&mut bytes)
        .unwrap();
    // Only the flag's table applies; the servlet default is replaced.
    assert_eq!(
        interfaces_of(&bytes),
        vec!["jakarta/mail/Transport", "javax/servlet/Filter"]
    );
    assert_eq!(fs::read(dump.join("demo/Mailer.class")).unwrap(), bytes);
    assert!(!temp.path().join("app.jar.partial").exists());
}

#[test]
fn broken_classes_are_counted_and_kept() {
    let temp = tempfile::tempdir().unwrap();
    let input = temp.path().join("classes");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join("Broken.class"), [0xCA, 0xFE, 0xBA, 0xBE, 0x00]).unwrap();
    fs::write(
        input.join("Good.class"),
        class_bytes("Good", &["javax/servlet/Servlet"]),
    )
    .unwrap();

    relocator(temp.path())
        .arg("rewrite")
        .arg(&input)
        .assert()
        .code(1)
        .stdout(predicate::str::contains(
            "classes seen: 2, changed: 1, failed: 1",
        ));

    assert_eq!(
        fs::read(input.join("Broken.class")).unwrap(),
        vec![0xCA, 0xFE, 0xBA, 0xBE, 0x00]
    );
    let good = fs::read(input.join("Good.class")).unwrap();
    assert_eq!(interfaces_of(&good), vec!["jakarta/servlet/Servlet"]);
}

#[test]
fn config_file_in_working_directory_is_picked_up() {
    let temp = tempfile::tempdir().unwrap();
    fs::write(
        temp.path().join("relocator.toml"),
        "[[relocations]]\nsource = \"javax.ws.rs\"\ntarget = \"jakarta.ws.rs\"\n",
    )
    .unwrap();
    let input = temp.path().join("classes");
    fs::create_dir_all(&input).unwrap();
    fs::write(
        input.join("Resource.class"),
        class_bytes("Resource", &["javax/ws/rs/core/Feature"]),
    )
    .unwrap();

    relocator(temp.path())
        .arg("rewrite")
        .arg(&input)
        .assert()
        .success();
    let bytes = fs::read(input.join("Resource.class")).unwrap();
    assert_eq!(interfaces_of(&bytes), vec!["jakarta/ws/rs/core/Feature"]);
}

#[test]
fn invalid_relocation_flag_fails() {
    let temp = tempfile::tempdir().unwrap();
    let input = temp.path().join("classes");
    fs::create_dir_all(&input).unwrap();

    relocator(temp.path())
        .arg("rewrite")
        .arg(&input)
        .args(["--relocate", "javax/servlet=javax/servlet/v2"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("invalid relocation"));
}

#[test]
fn explicit_jdk_must_exist() {
    let temp = tempfile::tempdir().unwrap();
    let input = temp.path().join("classes");
    fs::create_dir_all(&input).unwrap();

    relocator(temp.path())
        .arg("rewrite")
        .arg(&input)
        .arg("--jdk")
        .arg(temp.path().join("no-such-jdk"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("failed to open JDK"));
}

#[test]
fn explicit_jdk_is_accepted() {
    let temp = tempfile::tempdir().unwrap();
    let jdk = temp.path().join("jdk");
    fs::create_dir_all(jdk.join("jmods")).unwrap();
    {
        let mut zip = ZipWriter::new(File::create(jdk.join("jmods/java.base.jmod")).unwrap());
        zip.start_file("classes/java/io/InputStream.class", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(&class_bytes("java/io/InputStream", &[])).unwrap();
        zip.finish().unwrap();
    }
    let input = temp.path().join("classes");
    fs::create_dir_all(input.join("demo")).unwrap();
    fs::write(
        input.join("demo/AuditFilter.class"),
        class_bytes("demo/AuditFilter", &["javax/servlet/Filter"]),
    )
    .unwrap();

    relocator(temp.path())
        .arg("rewrite")
        .arg(&input)
        .arg("--jdk")
        .arg(&jdk)
        .assert()
        .success()
        .stdout(predicate::str::contains("changed: 1, failed: 0"));
}
