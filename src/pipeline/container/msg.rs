//! Outlook `.msg` reader.
//!
//! An MSG file is an OLE compound file. Message properties live in streams named
//! `__substg1.0_<PROPID><TYPE>`; each attachment is a `__attach_version1.0_#NNNNNNNN`
//! storage holding its own property streams. Attached messages either arrive as
//! plain binary data (a `.msg` file dragged in) or as an embedded storage, which is
//! re-serialized here into a standalone compound file so it can re-enter the
//! pipeline like any other attachment.

use std::io::{Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use cfb::CompoundFile;
use regex::Regex;

use super::{ContainerError, ContainerUnpacker, UnpackedMessage};
use crate::pipeline::import::format::sanitize_filename;
use crate::pipeline::types::RawFile;

const PROPERTIES_STREAM: &str = "__properties_version1.0";
const ATTACH_PREFIX: &str = "__attach_version1.0_#";
const RECIP_PREFIX: &str = "__recip_version1.0_#";

const PR_SUBJECT: u16 = 0x0037;
const PR_SENDER_NAME: u16 = 0x0C1A;
const PR_SENDER_EMAIL: u16 = 0x0C1F;
const PR_SENDER_SMTP: u16 = 0x5D01;
const PR_DISPLAY_TO: u16 = 0x0E04;
const PR_BODY: u16 = 0x1000;
const PR_BODY_HTML: u16 = 0x1013;
const PR_DISPLAY_NAME: u16 = 0x3001;
const PR_EMAIL_ADDRESS: u16 = 0x3003;
const PR_SMTP_ADDRESS: u16 = 0x39FE;
const PR_ATTACH_DATA: u16 = 0x3701;
const PR_ATTACH_FILENAME: u16 = 0x3704;
const PR_ATTACH_LONG_FILENAME: u16 = 0x3707;
const PR_ATTACH_MIME_TAG: u16 = 0x370E;

static HTML_SCRIPT_BLOCKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").unwrap());
static HTML_LINE_BREAKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>|</p>|</div>|</tr>").unwrap());
static HTML_TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

const TYPE_UNICODE: u16 = 0x001F;
const TYPE_STRING8: u16 = 0x001E;
const TYPE_BINARY: u16 = 0x0102;
const TYPE_OBJECT: u16 = 0x000D;

/// Production unpacker for Outlook `.msg` files.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgUnpacker;

impl ContainerUnpacker for MsgUnpacker {
    fn unpack(&self, bytes: &[u8]) -> Result<UnpackedMessage, ContainerError> {
        let mut comp = CompoundFile::open(Cursor::new(bytes))
            .map_err(|e| ContainerError::Cfb(e.to_string()))?;

        let root = Path::new("/");
        if !comp.is_stream(root.join(PROPERTIES_STREAM)) {
            return Err(ContainerError::MissingStream(PROPERTIES_STREAM.into()));
        }

        let subject = read_string(&mut comp, root, PR_SUBJECT)?.unwrap_or_default();
        let from = format_sender(&mut comp, root)?;
        let to = match read_string(&mut comp, root, PR_DISPLAY_TO)? {
            Some(to) if !to.trim().is_empty() => to,
            _ => format_recipients(&mut comp, root)?,
        };
        let body = match read_string(&mut comp, root, PR_BODY)? {
            Some(body) => body,
            None => read_binary(&mut comp, root, PR_BODY_HTML)?
                .map(|html| html_to_text(&String::from_utf8_lossy(&html)))
                .unwrap_or_default(),
        };
        let attachments = read_attachments(&mut comp, root)?;

        Ok(UnpackedMessage {
            from,
            to,
            subject,
            body,
            attachments,
        })
    }
}

fn read_attachments<F: Read + Seek>(
    comp: &mut CompoundFile<F>,
    root: &Path,
) -> Result<Vec<RawFile>, ContainerError> {
    let mut storages = child_storages(comp, root, ATTACH_PREFIX)?;
    storages.sort();

    let mut attachments = Vec::new();
    for (index, storage) in storages.iter().enumerate() {
        let name = [PR_ATTACH_LONG_FILENAME, PR_ATTACH_FILENAME, PR_DISPLAY_NAME]
            .iter()
            .find_map(|prop| {
                read_string(comp, storage, *prop)
                    .ok()
                    .flatten()
                    .filter(|s| !s.trim().is_empty())
            });

        if let Some(data) = read_binary(comp, storage, PR_ATTACH_DATA)? {
            let name = name.unwrap_or_else(|| format!("attachment_{}", index + 1));
            let mime_type = read_string(comp, storage, PR_ATTACH_MIME_TAG)?;
            attachments.push(RawFile::new(sanitize_filename(&name), data).with_mime_type(mime_type));
            continue;
        }

        let embedded = storage.join(prop_stream_name(PR_ATTACH_DATA, TYPE_OBJECT));
        if comp.is_storage(&embedded) && comp.is_stream(embedded.join(PROPERTIES_STREAM)) {
            let bytes = extract_embedded_message(comp, &embedded)?;
            let name = match name {
                Some(n) => n,
                None => {
                    let subject = read_string(comp, &embedded, PR_SUBJECT)?.unwrap_or_default();
                    if subject.trim().is_empty() {
                        format!("attachment_{}", index + 1)
                    } else {
                        subject
                    }
                }
            };
            let name = if name.to_ascii_lowercase().ends_with(".msg") {
                name
            } else {
                format!("{name}.msg")
            };
            attachments.push(RawFile::new(sanitize_filename(&name), bytes));
            continue;
        }

        tracing::debug!(
            storage = %storage.display(),
            "MSG attachment has no inline data, skipping"
        );
    }

    Ok(attachments)
}

/// Copy an embedded message storage into a new, standalone compound file.
fn extract_embedded_message<F: Read + Seek>(
    src: &mut CompoundFile<F>,
    storage: &Path,
) -> Result<Vec<u8>, ContainerError> {
    let mut dest = CompoundFile::create(Cursor::new(Vec::new()))?;
    copy_storage(src, storage, &mut dest, Path::new("/"))?;
    dest.flush()?;
    Ok(dest.into_inner().into_inner())
}

fn copy_storage<F: Read + Seek, G: Read + Write + Seek>(
    src: &mut CompoundFile<F>,
    from: &Path,
    dest: &mut CompoundFile<G>,
    to: &Path,
) -> std::io::Result<()> {
    let entries: Vec<(PathBuf, String, bool)> = src
        .read_storage(from)?
        .map(|e| (e.path().to_path_buf(), e.name().to_string(), e.is_storage()))
        .collect();

    for (path, name, is_storage) in entries {
        let target = to.join(&name);
        if is_storage {
            dest.create_storage(&target)?;
            copy_storage(src, &path, dest, &target)?;
        } else {
            let mut data = Vec::new();
            src.open_stream(&path)?.read_to_end(&mut data)?;
            let mut stream = dest.create_stream(&target)?;
            stream.write_all(&data)?;
            stream.flush()?;
        }
    }
    Ok(())
}

fn format_sender<F: Read + Seek>(
    comp: &mut CompoundFile<F>,
    root: &Path,
) -> Result<String, ContainerError> {
    let name = read_string(comp, root, PR_SENDER_NAME)?.unwrap_or_default();
    let email = match read_string(comp, root, PR_SENDER_SMTP)? {
        Some(e) if !e.trim().is_empty() => e,
        _ => read_string(comp, root, PR_SENDER_EMAIL)?.unwrap_or_default(),
    };
    Ok(name_with_address(&name, &email))
}

fn format_recipients<F: Read + Seek>(
    comp: &mut CompoundFile<F>,
    root: &Path,
) -> Result<String, ContainerError> {
    let mut storages = child_storages(comp, root, RECIP_PREFIX)?;
    storages.sort();

    let mut recipients = Vec::new();
    for storage in &storages {
        let name = read_string(comp, storage, PR_DISPLAY_NAME)?.unwrap_or_default();
        let email = match read_string(comp, storage, PR_SMTP_ADDRESS)? {
            Some(e) if !e.trim().is_empty() => e,
            _ => read_string(comp, storage, PR_EMAIL_ADDRESS)?.unwrap_or_default(),
        };
        let formatted = name_with_address(&name, &email);
        if !formatted.is_empty() {
            recipients.push(formatted);
        }
    }
    Ok(recipients.join("; "))
}

fn name_with_address(name: &str, email: &str) -> String {
    let (name, email) = (name.trim(), email.trim());
    match (name.is_empty(), email.is_empty()) {
        (false, false) if name != email => format!("{name} <{email}>"),
        (false, _) => name.to_string(),
        (true, false) => email.to_string(),
        (true, true) => String::new(),
    }
}

fn child_storages<F: Read + Seek>(
    comp: &CompoundFile<F>,
    parent: &Path,
    prefix: &str,
) -> Result<Vec<PathBuf>, ContainerError> {
    Ok(comp
        .read_storage(parent)?
        .filter(|e| e.is_storage() && e.name().starts_with(prefix))
        .map(|e| e.path().to_path_buf())
        .collect())
}

fn prop_stream_name(prop: u16, kind: u16) -> String {
    format!("__substg1.0_{prop:04X}{kind:04X}")
}

/// Read a string property, preferring the Unicode variant over the 8-bit one.
fn read_string<F: Read + Seek>(
    comp: &mut CompoundFile<F>,
    storage: &Path,
    prop: u16,
) -> Result<Option<String>, ContainerError> {
    let unicode = storage.join(prop_stream_name(prop, TYPE_UNICODE));
    if comp.is_stream(&unicode) {
        let data = read_stream(comp, &unicode)?;
        return Ok(Some(decode_utf16le(&data)));
    }

    let ansi = storage.join(prop_stream_name(prop, TYPE_STRING8));
    if comp.is_stream(&ansi) {
        let data = read_stream(comp, &ansi)?;
        let text = String::from_utf8_lossy(&data);
        return Ok(Some(text.trim_end_matches('\0').to_string()));
    }

    Ok(None)
}

fn read_binary<F: Read + Seek>(
    comp: &mut CompoundFile<F>,
    storage: &Path,
    prop: u16,
) -> Result<Option<Vec<u8>>, ContainerError> {
    let path = storage.join(prop_stream_name(prop, TYPE_BINARY));
    if comp.is_stream(&path) {
        Ok(Some(read_stream(comp, &path)?))
    } else {
        Ok(None)
    }
}

fn read_stream<F: Read + Seek>(
    comp: &mut CompoundFile<F>,
    path: &Path,
) -> Result<Vec<u8>, ContainerError> {
    let mut data = Vec::new();
    comp.open_stream(path)?.read_to_end(&mut data)?;
    Ok(data)
}

fn decode_utf16le(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
        .trim_end_matches('\0')
        .to_string()
}

/// Crude HTML-to-text for messages that only carry an HTML body.
fn html_to_text(html: &str) -> String {
    let text = HTML_SCRIPT_BLOCKS.replace_all(html, "");
    let text = HTML_LINE_BREAKS.replace_all(&text, "\n");
    let text = HTML_TAGS.replace_all(&text, "");
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
