// Copyright 2024-Present VMware, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::io::{self, Write};

use flate2::write::GzEncoder;
use flate2::Compression;

/// Gzip-compress a direct-ingestion payload.
pub fn gzip_compress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}
