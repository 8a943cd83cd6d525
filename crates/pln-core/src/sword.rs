//! SWORD v2 client for the downstream preservation network.

use std::path::{Path, PathBuf};

use chrono::Utc;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::redirect::Policy;
use reqwest::{Method, Response};
use tokio::io::AsyncWriteExt;

use crate::config::SwordConfig;
use crate::error::{PipelineError, Result};
use crate::paths::FilePaths;
use crate::types::Deposit;

pub const STATEMENT_REL: &str = "http://purl.org/net/sword/terms/statement";
const ATOM_ENTRY: &str = "application/atom+xml;type=entry";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDocument {
    pub collection_uri: String,
    pub max_upload_size: Option<String>,
    pub upload_checksum_type: Option<String>,
}

impl ServiceDocument {
    pub fn parse(xml: &str) -> Result<Self> {
        let collection_uri = find_attribute(xml, b"collection", None, b"href")?
            .filter(|href| !href.is_empty())
            .ok_or_else(|| PipelineError::Protocol("Empty collection URI".into()))?;

        Ok(Self {
            collection_uri,
            max_upload_size: find_text(xml, b"maxUploadSize")?,
            upload_checksum_type: find_text(xml, b"uploadChecksumType")?,
        })
    }
}

pub struct SwordClient {
    http: reqwest::Client,
    config: SwordConfig,
    paths: FilePaths,
}

impl SwordClient {
    pub fn new(config: SwordConfig, paths: FilePaths) -> Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(Policy::none())
            .connect_timeout(config.connect_timeout())
            .user_agent(config.user_agent.clone())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        Ok(Self {
            http,
            config,
            paths,
        })
    }

    /// Send a request. Transport failures and any status outside 2xx are
    /// written to the deposit's error log (when given) and returned as
    /// protocol errors.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        headers: &[(&str, &str)],
        body: Option<String>,
        deposit: Option<&mut Deposit>,
    ) -> Result<Response> {
        let mut request = self.http.request(method.clone(), url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, ATOM_ENTRY).body(body);
        }

        let request_line = format!("{method} {url}");
        let message = match request.send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                format!("{request_line}\n\n{status}\n\n{text}")
            }
            Err(err) => format!("{request_line}\n\n{err}"),
        };

        tracing::warn!(url, "SWORD request failed");
        if let Some(deposit) = deposit {
            deposit.log_error(message.clone());
        }
        Err(PipelineError::Protocol(message))
    }

    pub async fn service_document(&self) -> Result<ServiceDocument> {
        let response = self
            .request(
                Method::GET,
                &self.config.service_uri,
                &[("On-Behalf-Of", self.config.staging_uuid.as_str())],
                None,
                None,
            )
            .await?;
        let body = response.text().await?;
        ServiceDocument::parse(&body)
    }

    /// Post the deposit's Atom entry to the collection and record the receipt.
    pub async fn create_deposit(&self, deposit: &mut Deposit) -> Result<()> {
        let service = self.service_document().await?;
        let entry = deposit_entry(deposit, &self.config.public_base_url);

        if self.config.save_deposit_xml {
            let mut path = self.paths.staging_file(deposit)?.into_os_string();
            path.push(".xml");
            tokio::fs::write(PathBuf::from(path), entry.as_bytes()).await?;
        }

        let response = self
            .request(
                Method::POST,
                &service.collection_uri,
                &[],
                Some(entry),
                Some(&mut *deposit),
            )
            .await?;

        let Some(location) = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
        else {
            let message = format!(
                "POST {}\n\n{}\n\nResponse has no Location header for the deposit receipt.",
                service.collection_uri,
                response.status()
            );
            deposit.log_error(message.clone());
            return Err(PipelineError::Protocol(message));
        };
        deposit.deposit_receipt = Some(location.to_string());
        deposit.deposit_date = Some(Utc::now());

        Ok(())
    }

    /// The deposit receipt document, if the deposit has been sent.
    pub async fn receipt(&self, deposit: &mut Deposit) -> Result<Option<String>> {
        let Some(url) = deposit.deposit_receipt.clone() else {
            return Ok(None);
        };
        let response = self
            .request(Method::GET, &url, &[], None, Some(&mut *deposit))
            .await?;
        Ok(Some(response.text().await?))
    }

    pub async fn statement(&self, deposit: &mut Deposit) -> Result<String> {
        let receipt = self.receipt(deposit).await?.ok_or_else(|| {
            PipelineError::Protocol(format!(
                "deposit {} has no deposit receipt",
                deposit.deposit_uuid
            ))
        })?;
        let url = statement_url(&receipt)?.ok_or_else(|| {
            PipelineError::Protocol("deposit receipt has no statement link".into())
        })?;
        let response = self
            .request(Method::GET, &url, &[], None, Some(&mut *deposit))
            .await?;
        Ok(response.text().await?)
    }

    /// Download the original deposit back from the archive into the restore
    /// directory, returning the saved path.
    pub async fn fetch(&self, deposit: &mut Deposit) -> Result<PathBuf> {
        let statement = self.statement(deposit).await?;
        let original = original_deposit_urls(&statement)?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::Protocol("statement has no original deposit".into()))?;
        let path = self.paths.restore_file(deposit)?;
        self.download(&original, &path, Some(deposit)).await?;
        Ok(path)
    }

    /// Stream `url` to `path`, returning the number of bytes written.
    pub async fn download(
        &self,
        url: &str,
        path: &Path,
        deposit: Option<&mut Deposit>,
    ) -> Result<u64> {
        let mut response = self.request(Method::GET, url, &[], None, deposit).await?;
        let mut file = tokio::fs::File::create(path).await?;
        let mut bytes = 0u64;
        while let Some(chunk) = response.chunk().await? {
            bytes += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(bytes)
    }
}

/// Render the Atom entry announcing a staged package.
pub fn deposit_entry(deposit: &Deposit, public_base_url: &str) -> String {
    let journal = &deposit.journal;
    let text =
        |value: &Option<String>| escape(value.as_deref().unwrap_or_default()).into_owned();
    let base = public_base_url.trim_end_matches('/');
    let content_url = format!(
        "{base}/fetch/{}/{}.zip",
        journal.uuid_key(),
        deposit.uuid_key()
    );
    let container = deposit
        .au_container_id
        .map(|id| id.to_string())
        .unwrap_or_default();

    let properties = [
        ("base_url", journal.url.clone()),
        ("container_number", container),
        ("journal_url", journal.url.clone()),
        ("journal_title", journal.title.clone().unwrap_or_default()),
        ("publisher", journal.publisher_name.clone().unwrap_or_default()),
        ("issn", journal.issn.clone().unwrap_or_default()),
        ("journal_uuid", journal.uuid_key()),
    ];
    let properties: String = properties
        .iter()
        .map(|(name, value)| {
            format!(
                "        <lom:property name=\"{name}\" value=\"{}\"/>\n",
                escape(value.as_str())
            )
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<entry xmlns="http://www.w3.org/2005/Atom"
       xmlns:dcterms="http://purl.org/dc/terms/"
       xmlns:lom="http://lockssomatic.info/SWORD2"
       xmlns:pkp="http://pkp.sfu.ca/SWORD">
    <email>{email}</email>
    <title>{title}</title>
    <pkp:issn>{issn}</pkp:issn>
    <pkp:journal_url>{journal_url}</pkp:journal_url>
    <pkp:publisherName>{publisher_name}</pkp:publisherName>
    <pkp:publisherUrl>{publisher_url}</pkp:publisherUrl>
    <id>urn:uuid:{deposit_uuid}</id>
    <updated>{updated}</updated>
    <lom:content size="{size}" checksumType="{checksum_type}" checksumValue="{checksum_value}">{content_url}
{properties}    </lom:content>
</entry>
"#,
        email = text(&journal.email),
        title = text(&journal.title),
        issn = text(&journal.issn),
        journal_url = escape(journal.url.as_str()),
        publisher_name = text(&journal.publisher_name),
        publisher_url = text(&journal.publisher_url),
        deposit_uuid = deposit.uuid_key(),
        updated = deposit.received.format("%Y-%m-%dT%H:%M:%SZ"),
        size = deposit.package_size.unwrap_or(deposit.size),
        checksum_type = text(&deposit.package_checksum_type),
        checksum_value = text(&deposit.package_checksum_value),
        content_url = escape(content_url.as_str()),
    )
}

/// `href` of the receipt's statement link.
pub fn statement_url(receipt: &str) -> Result<Option<String>> {
    find_attribute(receipt, b"link", Some((b"rel", STATEMENT_REL)), b"href")
}

/// The archive's state term, from `<category label="State" term="...">`.
pub fn state_term(statement: &str) -> Result<Option<String>> {
    find_attribute(statement, b"category", Some((b"label", "State")), b"term")
}

/// Every `originalDeposit` href in a statement, in document order.
pub fn original_deposit_urls(statement: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(statement);
    let mut urls = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(element) | Event::Empty(element)
                if element.local_name().as_ref() == b"originalDeposit" =>
            {
                if let Some(href) = attribute(&element, b"href")? {
                    urls.push(href);
                }
            }
            Event::Eof => return Ok(urls),
            _ => {}
        }
    }
}

/// First `wanted` attribute of an element named `local_name` (namespace
/// prefixes ignored), optionally requiring another attribute to match.
fn find_attribute(
    xml: &str,
    local_name: &[u8],
    matching: Option<(&[u8], &str)>,
    wanted: &[u8],
) -> Result<Option<String>> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event()? {
            Event::Start(element) | Event::Empty(element)
                if element.local_name().as_ref() == local_name =>
            {
                if let Some((key, expected)) = matching {
                    if attribute(&element, key)?.as_deref() != Some(expected) {
                        continue;
                    }
                }
                if let Some(value) = attribute(&element, wanted)? {
                    return Ok(Some(value));
                }
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

fn find_text(xml: &str, local_name: &[u8]) -> Result<Option<String>> {
    let mut reader = Reader::from_str(xml);
    let mut inside = false;
    let mut text = String::new();
    loop {
        match reader.read_event()? {
            Event::Start(element) if element.local_name().as_ref() == local_name => {
                inside = true;
            }
            Event::Text(content) if inside => text.push_str(&content.unescape()?),
            Event::End(element) if inside && element.local_name().as_ref() == local_name => {
                let text = text.trim();
                return Ok((!text.is_empty()).then(|| text.to_string()));
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

fn attribute(element: &BytesStart<'_>, local_name: &[u8]) -> Result<Option<String>> {
    for attribute in element.attributes() {
        let attribute = attribute.map_err(|err| PipelineError::Xml(err.to_string()))?;
        if attribute.key.local_name().as_ref() == local_name {
            return Ok(Some(attribute.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}
