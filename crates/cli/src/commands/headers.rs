//! Upload header options shared by `sync` and `put`

use std::path::Path;

use clap::Args;
use s3sync_core::{PutOptions, UploadHeaders};

const METADATA_PREFIX: &str = "x-amz-meta-";

/// Upload header flags
#[derive(Args, Debug, Clone, Default)]
pub struct HeaderArgs {
    /// Add a header to every upload ("Name: value"); repeatable
    #[arg(long = "add-header", value_name = "NAME: VALUE")]
    pub add_header: Vec<String>,

    /// Content type used when none can be guessed
    #[arg(long, value_name = "TYPE")]
    pub default_mime_type: Option<String>,

    /// Do not guess the content type from the file extension
    #[arg(long)]
    pub no_guess_mime_type: bool,
}

impl HeaderArgs {
    /// Build the per-file header policy, rejecting malformed headers
    pub fn policy(&self) -> Result<HeaderPolicy, String> {
        let mut base = PutOptions::default();
        for header in &self.add_header {
            apply_header(&mut base, header)?;
        }
        Ok(HeaderPolicy {
            base,
            default_mime_type: self.default_mime_type.clone(),
            guess: !self.no_guess_mime_type,
        })
    }
}

/// Upload headers for each file: fixed headers plus a content type
#[derive(Debug, Clone)]
pub struct HeaderPolicy {
    base: PutOptions,
    default_mime_type: Option<String>,
    guess: bool,
}

impl HeaderPolicy {
    fn content_type(&self, source: &Path) -> Option<String> {
        let guessed = if self.guess {
            mime_guess::from_path(source).first_raw()
        } else {
            None
        };
        guessed
            .map(str::to_string)
            .or_else(|| self.default_mime_type.clone())
    }
}

impl UploadHeaders for HeaderPolicy {
    fn put_options(&self, source: &Path) -> PutOptions {
        let mut options = self.base.clone();
        if options.content_type.is_none() {
            options.content_type = self.content_type(source);
        }
        options
    }
}

/// Parse one "Name: value" header into the upload options
fn apply_header(options: &mut PutOptions, header: &str) -> Result<(), String> {
    let (name, value) = header
        .split_once(':')
        .ok_or_else(|| format!("Improperly formatted header: {header}"))?;
    let name = name.trim().to_ascii_lowercase();
    let value = value.trim().to_string();
    if name.is_empty() {
        return Err(format!("Improperly formatted header: {header}"));
    }

    match name.as_str() {
        "cache-control" => options.cache_control = Some(value),
        "content-disposition" => options.content_disposition = Some(value),
        "content-encoding" => options.content_encoding = Some(value),
        "content-language" => options.content_language = Some(value),
        "content-type" => options.content_type = Some(value),
        _ => match name.strip_prefix(METADATA_PREFIX) {
            Some(key) if !key.is_empty() => {
                options.metadata.insert(key.to_string(), value);
            }
            _ => return Err(format!("Unsupported header: {}", header.trim())),
        },
    }
    Ok(())
}
