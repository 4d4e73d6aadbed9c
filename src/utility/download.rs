// Copyright (c) The btfhub authors
// SPDX-License-Identifier: MIT

use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

use anyhow::{anyhow, bail, Context, Result};
use flate2::write::GzDecoder;
use futures::StreamExt;
use lazy_static::lazy_static;
use liblzma::write::XzDecoder;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::progress::ProgressCounter;

lazy_static! {
    static ref CLIENT: reqwest::Client = reqwest::Client::new();
    static ref HREF_RE: Regex = Regex::new(r#"href="([^"]+)""#).unwrap();
}

/// Fetch `url` into a freshly created file. Callers remove the file on error.
pub async fn download_file(shutdown: &CancellationToken, url: &str, file: &Path) -> Result<()> {
    let mut out = BufWriter::new(File::create(file)?);
    download(shutdown, url, &mut out).await?;
    out.flush()?;
    Ok(())
}

/// Fetch `url` into `dest`. Bodies served as `application/x-gzip` or
/// `application/x-xz` are decompressed on the fly; everything else is copied
/// verbatim. Cancellation aborts the transfer between chunks.
pub async fn download(
    shutdown: &CancellationToken,
    url: &str,
    dest: &mut (dyn Write + Send),
) -> Result<()> {
    let response = tokio::select! {
        _ = shutdown.cancelled() => return Err(anyhow!("download of {} canceled", url)),
        response = CLIENT.get(url).send() => response.with_context(|| format!("get {}", url))?,
    };

    if response.status() != reqwest::StatusCode::OK {
        bail!("{} returned status code: {}", url, response.status().as_u16());
    }

    let size = response.content_length().unwrap_or(0);
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();

    let sink = BodySink::new(&content_type, dest);
    let mut counter = ProgressCounter::new(Some(shutdown.clone()), "Download", url, size, sink);

    let mut body = response.bytes_stream();
    loop {
        let chunk = tokio::select! {
            _ = shutdown.cancelled() => return Err(anyhow!("download of {} canceled", url)),
            chunk = body.next() => chunk,
        };
        match chunk {
            None => break,
            Some(chunk) => {
                let bytes = chunk.with_context(|| format!("read body of {}", url))?;
                counter.write_all(&bytes)?;
            }
        }
    }

    counter.into_inner().finish()?;
    Ok(())
}

/// Fetch an HTML directory index and return every href target resolved
/// against the index URL, in document order. Malformed joins are skipped.
pub async fn get_links(shutdown: &CancellationToken, repo_url: &str) -> Result<Vec<String>> {
    let mut body: Vec<u8> = Vec::new();
    download(shutdown, repo_url, &mut body)
        .await
        .with_context(|| format!("get links from {}", repo_url))?;

    let base = Url::parse(repo_url).with_context(|| format!("parse url {}", repo_url))?;

    let mut links = Vec::new();
    for line in body.split(|b| *b == b'\n') {
        let line = String::from_utf8_lossy(line);
        for captures in HREF_RE.captures_iter(&line) {
            match base.join(&captures[1]) {
                Ok(resolved) => links.push(resolved.to_string()),
                Err(_) => continue,
            }
        }
    }
    Ok(links)
}

// Response body sink: plain copy or streaming decompression, chosen by the
// Content-Type of the response.
enum BodySink<'a> {
    Plain(&'a mut (dyn Write + Send)),
    Gzip(GzDecoder<&'a mut (dyn Write + Send)>),
    Xz(XzDecoder<&'a mut (dyn Write + Send)>),
}

impl<'a> BodySink<'a> {
    fn new(content_type: &str, dest: &'a mut (dyn Write + Send)) -> Self {
        match content_type {
            "application/x-gzip" => BodySink::Gzip(GzDecoder::new(dest)),
            "application/x-xz" => BodySink::Xz(XzDecoder::new(dest)),
            _ => BodySink::Plain(dest),
        }
    }

    fn finish(self) -> io::Result<()> {
        match self {
            BodySink::Plain(_) => Ok(()),
            BodySink::Gzip(decoder) => decoder.finish().map(|_| ()),
            BodySink::Xz(decoder) => decoder.finish().map(|_| ()),
        }
    }
}

impl<'a> Write for BodySink<'a> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            BodySink::Plain(dest) => dest.write(buf),
            BodySink::Gzip(decoder) => decoder.write(buf),
            BodySink::Xz(decoder) => decoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            BodySink::Plain(dest) => dest.flush(),
            BodySink::Gzip(decoder) => decoder.flush(),
            BodySink::Xz(decoder) => decoder.flush(),
        }
    }
}
