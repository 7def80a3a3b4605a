use assert_fs::prelude::*;
use secrecy::SecretString;
use std::fs;

use seft::{
    DecryptOptions, EncryptOptions, ErrorKind, MIN_ITERATIONS, Mode, SeftError, decrypt_file,
    encrypt_file, inspect_file, is_encrypted_file,
};

fn pw(s: &str) -> SecretString {
    SecretString::new(s.into())
}

fn fast() -> EncryptOptions {
    EncryptOptions::default().with_iterations(MIN_ITERATIONS)
}

#[test]
fn round_trip_both_modes() -> Result<(), Box<dyn std::error::Error>> {
    let td = assert_fs::TempDir::new()?;
    let data: Vec<u8> = (0..1_300_000u32).map(|i| (i % 251) as u8).collect();
    let plain = td.child("big.bin");
    plain.write_binary(&data)?;

    for (mode, dir) in [(Mode::Aes256GcmSiv, "siv"), (Mode::Aes256Cbc, "cbc")] {
        let vault = td.child(dir);
        let enc = encrypt_file(plain.path(), pw("pw"), Some(vault.path()), &fast().with_mode(mode))?;
        assert_eq!(enc, vault.path().join("big.bin.enc"));
        assert_eq!(inspect_file(&enc)?.mode, mode);

        let out = td.child(format!("{dir}-out"));
        let dec = decrypt_file(&enc, pw("pw"), Some(out.path()), &DecryptOptions::default())?;
        assert_eq!(fs::read(dec)?, data);
    }
    td.close()?;
    Ok(())
}

#[test]
fn empty_file_round_trips() -> Result<(), Box<dyn std::error::Error>> {
    let td = assert_fs::TempDir::new()?;
    let plain = td.child("empty");
    plain.touch()?;
    let enc = encrypt_file(plain.path(), pw("pw"), Some(td.child("v").path()), &fast())?;
    let dec = decrypt_file(&enc, pw("pw"), None, &DecryptOptions::default())?;
    assert_eq!(fs::read(dec)?, b"");
    Ok(())
}

#[test]
fn missing_input_is_file_not_found() {
    let td = assert_fs::TempDir::new().unwrap();
    let err = encrypt_file(&td.path().join("nope.txt"), pw("pw"), None, &fast()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FileNotFound);
}

#[test]
fn decrypt_requires_enc_extension() {
    let td = assert_fs::TempDir::new().unwrap();
    let f = td.child("data.bin");
    f.write_binary(b"SEFT whatever").unwrap();
    let err = decrypt_file(f.path(), pw("pw"), None, &DecryptOptions::default()).unwrap_err();
    assert!(matches!(err, SeftError::InvalidInput(_)));
}

/// Decrypt into an existing output:
/// - without force => must fail and keep the preexisting file intact
/// - with force    => must succeed and replace contents
#[test]
fn dec_refuses_and_then_overwrites() -> Result<(), Box<dyn std::error::Error>> {
    let td = assert_fs::TempDir::new()?;
    let plain = td.child("plain.txt");
    plain.write_str("hello secret\n")?;
    let vault = td.child("vault");
    let enc = encrypt_file(plain.path(), pw("pw"), Some(vault.path()), &fast())?;

    let out = td.child("out");
    out.child("plain.txt").write_str("preexisting")?;

    let err = decrypt_file(&enc, pw("pw"), Some(out.path()), &DecryptOptions::default())
        .unwrap_err();
    assert!(err.to_string().contains("use --force"));
    out.child("plain.txt").assert("preexisting");

    decrypt_file(
        &enc,
        pw("pw"),
        Some(out.path()),
        &DecryptOptions::default().with_force(true),
    )?;
    out.child("plain.txt").assert("hello secret\n");
    Ok(())
}

#[test]
fn failures_leave_no_temp_files() -> Result<(), Box<dyn std::error::Error>> {
    let td = assert_fs::TempDir::new()?;
    let plain = td.child("a.txt");
    plain.write_str("abc")?;
    let enc = encrypt_file(plain.path(), pw("right"), Some(td.child("v").path()), &fast())?;

    let out = td.child("out");
    out.create_dir_all()?;
    let err = decrypt_file(&enc, pw("wrong"), Some(out.path()), &DecryptOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
    assert_eq!(fs::read_dir(out.path())?.count(), 0);

    let opts = fast();
    opts.cancel.cancel();
    let err = encrypt_file(plain.path(), pw("pw"), Some(out.path()), &opts).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(fs::read_dir(out.path())?.count(), 0);
    Ok(())
}

#[test]
fn iterations_are_embedded_and_honoured() -> Result<(), Box<dyn std::error::Error>> {
    let td = assert_fs::TempDir::new()?;
    let plain = td.child("a.txt");
    plain.write_str("abc")?;
    let enc = encrypt_file(
        plain.path(),
        pw("pw"),
        Some(td.child("v").path()),
        &fast().with_iterations(123_456),
    )?;
    assert!(is_encrypted_file(&enc));
    assert_eq!(inspect_file(&enc)?.iterations, 123_456);
    // nothing to configure on the decrypt side
    decrypt_file(&enc, pw("pw"), Some(td.child("o").path()), &DecryptOptions::default())?;
    Ok(())
}

#[test]
fn weak_iteration_count_is_rejected() {
    let td = assert_fs::TempDir::new().unwrap();
    let plain = td.child("a.txt");
    plain.write_str("abc").unwrap();
    let err = encrypt_file(
        plain.path(),
        pw("pw"),
        None,
        &fast().with_iterations(MIN_ITERATIONS - 1),
    )
    .unwrap_err();
    assert!(err.to_string().contains("kdf:"));
    assert!(!td.child("a.txt.enc").path().exists());
}
