//! Converter process handling, exercised with stand-in shell scripts.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use bookdrop::{Conversion, Converter, Error};
use tempfile::TempDir;

// Writing an executable while another test spawns a child can fail with
// ETXTBSY; serialize the tests in this file.
static SERIAL: Mutex<()> = Mutex::new(());

fn script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("ebook-convert");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn input(dir: &Path) -> PathBuf {
    let path = dir.join("book.epub");
    fs::write(&path, b"epub").unwrap();
    path
}

// ============================================================================
// Outcomes
// ============================================================================

#[test]
fn test_successful_conversion_writes_beside_input() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let dir = TempDir::new().unwrap();
    let converter = Converter::with_executable(script(dir.path(), r#"cp "$1" "$2""#));
    let book = input(dir.path());

    let result = converter.convert(&book).unwrap();

    let expected = dir.path().join("book.azw3");
    assert_eq!(result, Conversion::Converted(expected.clone()));
    assert_eq!(fs::read(&expected).unwrap(), b"epub");
}

#[test]
fn test_failure_reports_stderr() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let dir = TempDir::new().unwrap();
    let converter =
        Converter::with_executable(script(dir.path(), "echo 'bad input' >&2\nexit 3"));

    let err = converter.convert(input(dir.path())).unwrap_err();
    match err {
        Error::Conversion(message) => assert_eq!(message, "bad input"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_missing_output_is_an_error() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let dir = TempDir::new().unwrap();
    let converter = Converter::with_executable(script(dir.path(), "exit 0"));

    let err = converter.convert(input(dir.path())).unwrap_err();
    assert!(matches!(err, Error::Conversion(_)));
    assert!(!dir.path().join("book.azw3").exists());
}

#[test]
fn test_timeout_kills_converter() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let dir = TempDir::new().unwrap();
    let converter = Converter::with_executable(script(dir.path(), "sleep 30"))
        .with_timeout(Duration::from_millis(300));

    let start = Instant::now();
    let err = converter.convert(input(dir.path())).unwrap_err();

    assert!(matches!(err, Error::ConversionTimedOut(_)));
    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!(err.kind(), bookdrop::ErrorKind::Conversion);
}

#[test]
fn test_explicit_output_path() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let dir = TempDir::new().unwrap();
    let converter = Converter::with_executable(script(dir.path(), r#"cp "$1" "$2""#));
    let output = dir.path().join("out.mobi");

    let result = converter.convert_to(&input(dir.path()), &output).unwrap();
    assert_eq!(result, Conversion::Converted(output.clone()));
    assert!(output.is_file());
}

// ============================================================================
// Discovery
// ============================================================================

#[test]
fn test_unavailable_leaves_input_alone() {
    let dir = TempDir::new().unwrap();
    let book = input(dir.path());

    let result = Converter::unavailable().convert(&book).unwrap();

    assert_eq!(result, Conversion::Unavailable);
    assert_eq!(fs::read(&book).unwrap(), b"epub");
    assert!(!dir.path().join("book.azw3").exists());
}
