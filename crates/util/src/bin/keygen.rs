//! Generates a fresh pre-shared symmetric key file for the fleet to share
//! out of band. Grounded on `authenticator`'s `gen_config` bin: draw random
//! bytes from the crypto module's CSPRNG, write them straight to a file.

use clap::{App, Arg};
use driftwatch_proto::crypto::{self, KEY_SIZE};
use std::fs;

fn main() {
    let matches = App::new("driftwatch-keygen")
        .version("0.1.0")
        .about("Generates a fresh pre-shared symmetric key file")
        .arg(
            Arg::with_name("KEY_FILE")
                .help("Path the new key will be written to")
                .required(true),
        )
        .get_matches();

    let key_file_path = matches.value_of("KEY_FILE").unwrap();

    let mut key = [0u8; KEY_SIZE];
    crypto::random_bytes(&mut key);

    fs::write(key_file_path, key).unwrap_or_else(|e| {
        eprintln!("failed to write key file `{}`: {}", key_file_path, e);
        std::process::exit(1);
    });

    println!("wrote {}-byte key to `{}`", KEY_SIZE, key_file_path);
}
