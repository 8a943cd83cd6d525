//! Streaming checks over OJS export documents: well-formedness, UTF-8
//! repair, document type validation and access to embedded payloads.

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tempfile::NamedTempFile;

use crate::error::{PipelineError, Result};

const BLOCK_SIZE: usize = 64 * 1024;

pub const PKP_PUBLIC_ID: &str = "-//PKP//OJS Articles and Issues XML//EN";
pub const PKP_NAMESPACE: &str = "http://pkp.sfu.ca";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Doctype {
    pub name: String,
    pub public_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootElement {
    pub name: String,
    pub namespace: Option<String>,
    pub line: usize,
}

/// Result of a successful parse. When the source needed UTF-8 repair the
/// repaired copy is owned here and used for every later read.
#[derive(Debug)]
pub struct XmlDocument {
    original: PathBuf,
    repaired: Option<NamedTempFile>,
    pub doctype: Option<Doctype>,
    pub root: Option<RootElement>,
}

impl XmlDocument {
    /// Path the parsed content is read from.
    pub fn source_path(&self) -> &Path {
        match &self.repaired {
            Some(file) => file.path(),
            None => &self.original,
        }
    }

    pub fn file_name(&self) -> String {
        file_name(&self.original)
    }

    pub fn embeds(&self) -> Result<EmbedReader> {
        EmbedReader::open(self.source_path())
    }
}

#[derive(Debug, Default)]
pub struct XmlParser {
    notices: Vec<String>,
}

struct ParseFailure {
    encoding: bool,
    message: String,
}

impl XmlParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notices about repaired input, in the order they were produced.
    pub fn notices(&self) -> &[String] {
        &self.notices
    }

    pub fn load(&mut self, path: &Path) -> Result<XmlDocument> {
        let failure = match parse(path)? {
            Ok((doctype, root)) => {
                return Ok(XmlDocument {
                    original: path.to_path_buf(),
                    repaired: None,
                    doctype,
                    root,
                });
            }
            Err(failure) => failure,
        };

        if !failure.encoding {
            return Err(PipelineError::Xml(failure.message));
        }

        let repaired = tempfile::Builder::new().prefix("pln-xml-").tempfile()?;
        let removed = sanitize_utf8(path, repaired.path())?;
        self.notices.push(format!(
            "{} contains {removed} invalid UTF-8 characters, which have been removed.",
            file_name(path)
        ));

        match parse(repaired.path())? {
            Ok((doctype, root)) => Ok(XmlDocument {
                original: path.to_path_buf(),
                repaired: Some(repaired),
                doctype,
                root,
            }),
            Err(failure) => Err(PipelineError::Xml(format!(
                "Filtered XML cannot be parsed. {}",
                failure.message
            ))),
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

type ParseSummary = (Option<Doctype>, Option<RootElement>);

/// Stream the whole document. The outer result carries I/O failures, the
/// inner one well-formedness failures.
fn parse(path: &Path) -> Result<std::result::Result<ParseSummary, ParseFailure>> {
    let mut reader = Reader::from_reader(BufReader::new(File::open(path)?));
    reader.config_mut().check_end_names = true;

    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut doctype = None;
    let mut root: Option<RootElement> = None;

    let fail = |path: &Path, offset: u64, encoding: bool, message: String| -> Result<_> {
        let line = line_at(path, offset)?;
        Ok(Err(ParseFailure {
            encoding,
            message: format!("{message} at {}:{line}.", path.display()),
        }))
    };

    loop {
        let start = reader.buffer_position() as u64;
        let event = match reader.read_event_into(&mut buf) {
            Ok(event) => event,
            Err(quick_xml::Error::Io(err)) => {
                return Err(PipelineError::Io(std::io::Error::new(
                    err.kind(),
                    err.to_string(),
                )))
            }
            Err(err) => {
                let offset = reader.error_position() as u64;
                return fail(path, offset, false, err.to_string());
            }
        };

        if std::str::from_utf8(event_bytes(&event)).is_err() {
            return fail(
                path,
                start,
                true,
                "Input is not proper UTF-8".to_string(),
            );
        }

        let opens = matches!(event, Event::Start(_));
        match event {
            Event::DocType(text) => {
                doctype = parse_doctype(&String::from_utf8_lossy(&text));
            }
            Event::Start(element) | Event::Empty(element) => {
                if depth == 0 {
                    if root.is_some() {
                        return fail(
                            path,
                            start,
                            false,
                            "Extra content at the end of the document".to_string(),
                        );
                    }
                    let line = line_at(path, start)?;
                    match root_element(&element, line) {
                        Ok(element) => root = Some(element),
                        Err(message) => return fail(path, start, false, message),
                    }
                } else if let Err(message) = check_attributes(&element) {
                    return fail(path, start, false, message);
                }
                if opens {
                    depth += 1;
                }
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
            }
            Event::Text(text) if depth == 0 => {
                let content = String::from_utf8_lossy(&text);
                if !content.trim_matches(|c: char| c.is_whitespace() || c == '\u{feff}').is_empty()
                {
                    return fail(
                        path,
                        start,
                        false,
                        "Content outside the root element".to_string(),
                    );
                }
            }
            Event::CData(_) if depth == 0 => {
                return fail(
                    path,
                    start,
                    false,
                    "Content outside the root element".to_string(),
                );
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let end = reader.buffer_position() as u64;
    if root.is_none() {
        return fail(path, end, false, "Document is empty".to_string());
    }
    if depth != 0 {
        return fail(path, end, false, "Premature end of data".to_string());
    }

    Ok(Ok((doctype, root)))
}

fn event_bytes<'a>(event: &'a Event<'_>) -> &'a [u8] {
    match event {
        Event::Start(element) | Event::Empty(element) => &**element,
        Event::End(element) => &**element,
        Event::Text(text) | Event::Comment(text) | Event::DocType(text) => &**text,
        Event::CData(data) => &**data,
        _ => &[],
    }
}

fn check_attributes(element: &BytesStart<'_>) -> std::result::Result<(), String> {
    for attribute in element.attributes() {
        attribute.map_err(|err| err.to_string())?;
    }
    Ok(())
}

fn root_element(element: &BytesStart<'_>, line: usize) -> std::result::Result<RootElement, String> {
    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
    let prefix = name.split_once(':').map(|(prefix, _)| prefix.to_string());
    let wanted = match &prefix {
        Some(prefix) => format!("xmlns:{prefix}"),
        None => "xmlns".to_string(),
    };

    let mut namespace = None;
    for attribute in element.attributes() {
        let attribute = attribute.map_err(|err| err.to_string())?;
        if attribute.key.as_ref() == wanted.as_bytes() {
            let value = attribute
                .unescape_value()
                .map_err(|err| err.to_string())?;
            namespace = Some(value.into_owned());
        }
    }

    Ok(RootElement {
        name,
        namespace,
        line,
    })
}

/// Split `name PUBLIC "id" "system"` (or `name SYSTEM "system"`).
fn parse_doctype(content: &str) -> Option<Doctype> {
    let content = content.trim();
    let (name, rest) = match content.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim_start()),
        None => (content, ""),
    };
    if name.is_empty() {
        return None;
    }

    let public_id = rest.strip_prefix("PUBLIC").and_then(|rest| {
        let rest = rest.trim_start();
        let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
        let rest = &rest[1..];
        rest.find(quote).map(|end| rest[..end].to_string())
    });

    Some(Doctype {
        name: name.to_string(),
        public_id,
    })
}

/// 1-based line number of byte `offset` in `path`.
fn line_at(path: &Path, offset: u64) -> Result<usize> {
    let mut reader = BufReader::new(File::open(path)?).take(offset);
    let mut block = vec![0u8; BLOCK_SIZE];
    let mut line = 1;
    loop {
        let read = reader.read(&mut block)?;
        if read == 0 {
            break;
        }
        line += block[..read].iter().filter(|b| **b == b'\n').count();
    }
    Ok(line)
}

/// Copy `from` to `to` in 64 KiB blocks, dropping invalid UTF-8 sequences.
/// Sequences split across blocks are carried into the next block. Returns the
/// number of bytes removed.
pub fn sanitize_utf8(from: &Path, to: &Path) -> Result<u64> {
    let mut input = File::open(from)?;
    let mut output = File::create(to)?;
    let mut block = vec![0u8; BLOCK_SIZE];
    let mut pending: Vec<u8> = Vec::new();
    let mut removed = 0u64;

    loop {
        let read = input.read(&mut block)?;
        let at_eof = read == 0;
        pending.extend_from_slice(&block[..read]);

        let mut rest: &[u8] = &pending;
        let mut carry = Vec::new();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    output.write_all(valid.as_bytes())?;
                    break;
                }
                Err(err) => {
                    let (valid, tail) = rest.split_at(err.valid_up_to());
                    output.write_all(valid)?;
                    match err.error_len() {
                        Some(len) => {
                            removed += len as u64;
                            rest = &tail[len..];
                        }
                        None if at_eof => {
                            removed += tail.len() as u64;
                            break;
                        }
                        None => {
                            carry = tail.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        pending = carry;

        if at_eof {
            break;
        }
    }

    output.flush()?;
    Ok(removed)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlValidationError {
    pub file: String,
    pub line: usize,
    pub message: String,
}

/// Checks that a parsed export is a PKP document: either it declares the OJS
/// export DTD and its root matches the DOCTYPE, or its root element is in the
/// PKP native namespace.
#[derive(Debug, Default)]
pub struct DtdValidator {
    errors: Vec<XmlValidationError>,
}

impl DtdValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&mut self, document: &XmlDocument) {
        let file = document.file_name();
        let line = document.root.as_ref().map(|root| root.line).unwrap_or(1);
        let mut error = |message: String| {
            self.errors.push(XmlValidationError {
                file: file.clone(),
                line,
                message,
            })
        };

        match (&document.doctype, &document.root) {
            (_, None) => error("Document has no root element.".to_string()),
            (Some(doctype), Some(root)) => {
                match doctype.public_id.as_deref() {
                    Some(PKP_PUBLIC_ID) => {}
                    Some(other) => error(format!(
                        "Unexpected document type public identifier \"{other}\"."
                    )),
                    None => error("Document type declaration has no public identifier.".to_string()),
                }
                if doctype.name != root.name {
                    error(format!(
                        "Root element {} does not match document type {}.",
                        root.name, doctype.name
                    ));
                }
            }
            (None, Some(root)) => match root.namespace.as_deref() {
                Some(PKP_NAMESPACE) => {}
                Some(other) => error(format!(
                    "Root element {} is in namespace {other}, expected {PKP_NAMESPACE}.",
                    root.name
                )),
                None => error(format!(
                    "Root element {} declares neither the PKP document type nor the {PKP_NAMESPACE} namespace.",
                    root.name
                )),
            },
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[XmlValidationError] {
        &self.errors
    }
}

/// One `<embed>` element's payload, still base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedPayload {
    pub filename: String,
    encoded: Vec<u8>,
}

impl EmbeddedPayload {
    pub fn new(filename: impl Into<String>, encoded: &str) -> Self {
        Self {
            filename: filename.into(),
            encoded: encoded
                .bytes()
                .filter(|b| !b.is_ascii_whitespace())
                .collect(),
        }
    }

    pub fn encoded_len(&self) -> usize {
        self.encoded.len()
    }

    /// Decode the payload in 64 KiB slices of the encoded text. Anything
    /// outside the base64 alphabet fails the slice it lands in.
    pub fn chunks(&self) -> impl Iterator<Item = Result<Vec<u8>>> + '_ {
        self.encoded.chunks(BLOCK_SIZE).map(move |slice| {
            if let Some(byte) = slice.iter().find(|b| !b.is_ascii()) {
                return Err(PipelineError::Validation(format!(
                    "embedded file {} is not valid base64: non-ASCII byte 0x{byte:02X}",
                    self.filename
                )));
            }
            STANDARD.decode(slice).map_err(|err| {
                PipelineError::Validation(format!(
                    "embedded file {} is not valid base64: {err}",
                    self.filename
                ))
            })
        })
    }

    pub fn decode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded.len() / 4 * 3);
        for chunk in self.chunks() {
            out.extend(chunk?);
        }
        Ok(out)
    }
}

/// Pulls `<embed>` payloads out of a document one element at a time.
pub struct EmbedReader {
    reader: Reader<BufReader<File>>,
    buf: Vec<u8>,
}

impl EmbedReader {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = Reader::from_reader(BufReader::new(File::open(path)?));
        Ok(Self {
            reader,
            buf: Vec::new(),
        })
    }

    pub fn next_embed(&mut self) -> Result<Option<EmbeddedPayload>> {
        loop {
            self.buf.clear();
            let event = self.reader.read_event_into(&mut self.buf)?;
            let (filename, has_body) = match event {
                Event::Start(element) if is_embed(&element) => (embed_filename(&element)?, true),
                Event::Empty(element) if is_embed(&element) => (embed_filename(&element)?, false),
                Event::Eof => return Ok(None),
                _ => continue,
            };
            let encoded = if has_body {
                self.read_embed_body()?
            } else {
                String::new()
            };
            return Ok(Some(EmbeddedPayload::new(filename, &encoded)));
        }
    }

    fn read_embed_body(&mut self) -> Result<String> {
        let mut encoded = String::new();
        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf)? {
                Event::Text(text) => encoded.push_str(&String::from_utf8_lossy(&text)),
                Event::CData(data) => encoded.push_str(&String::from_utf8_lossy(&data)),
                Event::End(element) if element.local_name().as_ref() == b"embed" => {
                    return Ok(encoded)
                }
                Event::Eof => {
                    return Err(PipelineError::Xml("unterminated embed element".into()));
                }
                _ => {}
            }
        }
    }
}

fn is_embed(element: &BytesStart<'_>) -> bool {
    element.local_name().as_ref() == b"embed"
}

fn embed_filename(element: &BytesStart<'_>) -> Result<String> {
    let attribute = element
        .try_get_attribute("filename")
        .map_err(|err| PipelineError::Xml(err.to_string()))?;
    match attribute {
        Some(attribute) => Ok(attribute.unescape_value()?.into_owned()),
        None => Ok(String::new()),
    }
}
