//! File content extraction tool.
//!
//! Downloads a file with the caller's credential, turns it into text based
//! on its extension and hands it back one page at a time.

use async_trait::async_trait;
use scraper::Html;
use tooloop_core::error::ToolError;
use tooloop_core::tool::{Tool, ToolCall, ToolContext, ToolResult};
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_PAGE_SIZE: usize = 10_000;

const NOT_FOUND: &str = "Error: File content not found.";

pub struct FileExtractionTool {
    client: reqwest::Client,
    base: Url,
    page_size: usize,
}

impl FileExtractionTool {
    /// `endpoint` is the base that relative file URLs are resolved against.
    pub fn new(endpoint: &str, page_size: usize) -> Result<Self, ToolError> {
        let base = Url::parse(&format!("{}/", endpoint.trim_end_matches('/')))
            .map_err(|e| ToolError::Unavailable(format!("invalid file endpoint '{endpoint}': {e}")))?;
        Ok(Self {
            client: reqwest::Client::new(),
            base,
            page_size: page_size.max(1),
        })
    }

    fn resolve(&self, file_url: &str) -> Result<Url, ToolError> {
        self.base
            .join(file_url.trim_start_matches('/'))
            .map_err(|e| ToolError::InvalidArguments(format!("invalid file_url '{file_url}': {e}")))
    }

    async fn download(&self, call: &ToolCall, url: Url, api_key: Option<&str>) -> Result<Vec<u8>, ToolError> {
        let mut request = self.client.get(url.clone());
        if let Some(key) = api_key {
            request = request.bearer_auth(key).header("api-key", key);
        }

        let failed = |reason: String| ToolError::ExecutionFailed {
            tool_name: call.name.clone(),
            reason,
        };

        let response = request
            .send()
            .await
            .map_err(|e| failed(format!("download of {url} failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("download of {url} returned {status}")));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| failed(format!("reading {url} failed: {e}")))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl Tool for FileExtractionTool {
    fn name(&self) -> &str {
        "file_content_extraction"
    }

    fn description(&self) -> &str {
        "Extracts text content from files (PDF, TXT, CSV, HTML/HTM and other text formats). \
         CSV is returned as a markdown table. Large files are paginated; use the 'page' \
         parameter to navigate them."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_url": {
                    "type": "string",
                    "description": "URL of the file to extract content from. Supported: PDF, TXT, CSV, HTML/HTM."
                },
                "page": {
                    "type": "integer",
                    "description": format!(
                        "Page to return for large documents. Each page holds {} characters.",
                        self.page_size
                    ),
                    "default": 1
                }
            },
            "required": ["file_url"]
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let file_url = call.arguments["file_url"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'file_url' argument".into()))?;
        let page = call.arguments["page"].as_i64().unwrap_or(1);

        let stage = &ctx.stage;
        stage.append("## Request arguments: \n");
        stage.append(format!("**File URL**: {file_url}\n\r"));
        if page > 1 {
            stage.append(format!("**Page**: {page}\n\r"));
        }
        stage.append("## Response: \n");

        let url = self.resolve(file_url)?;
        debug!(url = %url, page, "Extracting file content");
        let bytes = self.download(call, url.clone(), ctx.api_key.as_deref()).await?;

        let text = extract_text(&bytes, &extension_of(&url));
        let content = if text.is_empty() {
            NOT_FOUND.to_string()
        } else {
            paginate(&text, page, self.page_size)
        };

        stage.append(format!("```text\n\r{content}\n\r```\n\r"));
        Ok(ToolResult::success(call, content))
    }
}

/// Lower-cased extension of the last path segment, with the leading dot.
fn extension_of(url: &Url) -> String {
    let name = url.path_segments().and_then(|mut s| s.next_back()).unwrap_or("");
    match name.rfind('.') {
        Some(dot) => name[dot..].to_ascii_lowercase(),
        None => String::new(),
    }
}

/// Turn raw file bytes into text according to the file extension.
///
/// Unreadable documents yield an empty string.
pub fn extract_text(bytes: &[u8], extension: &str) -> String {
    if extension == ".pdf" {
        return pdf_to_text(bytes);
    }

    let decoded = String::from_utf8_lossy(bytes);
    match extension {
        ".csv" => csv_to_markdown(&decoded),
        ".html" | ".htm" => html_to_text(&decoded),
        _ => decoded.into_owned(),
    }
}

/// Slice `content` into pages of `page_size` characters.
///
/// Content that fits in one page is returned unchanged. Otherwise the
/// requested page (clamped to at least 1) gets a footer naming the page
/// count, or an error when it is past the end.
pub fn paginate(content: &str, page: i64, page_size: usize) -> String {
    let page_size = page_size.max(1);
    let len = content.chars().count();
    if len <= page_size {
        return content.to_string();
    }

    let total = len.div_ceil(page_size);
    let page = page.max(1) as usize;
    if page > total {
        return format!("Error: Page {page} does not exist. Total pages: {total}");
    }

    let slice: String = content.chars().skip((page - 1) * page_size).take(page_size).collect();
    format!("{slice}\n\n**Page #{page}. Total pages: {total}**")
}

/// Text of every page, in page order, one page per line block.
fn pdf_to_text(bytes: &[u8]) -> String {
    let document = match lopdf::Document::load_mem(bytes) {
        Ok(document) => document,
        Err(e) => {
            warn!(error = %e, "Unreadable PDF");
            return String::new();
        }
    };

    document
        .get_pages()
        .keys()
        .map(|&page| match document.extract_text(&[page]) {
            Ok(text) => text.trim_end().to_string(),
            Err(e) => {
                debug!(page, error = %e, "PDF page has no extractable text");
                String::new()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render CSV as a markdown table with the first row as header. Line
/// breaks inside quoted cells become `<br>`.
fn csv_to_markdown(input: &str) -> String {
    let rows: Vec<Vec<String>> = csv_records(input)
        .into_iter()
        .map(|row| row.into_iter().map(|cell| cell.replace("\r\n", "<br>").replace('\n', "<br>")).collect())
        .collect();
    let Some(header) = rows.first() else {
        return String::new();
    };

    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    let render = |row: &Vec<String>| {
        let cells: Vec<&str> = (0..width).map(|i| row.get(i).map(String::as_str).unwrap_or("")).collect();
        format!("| {} |", cells.join(" | "))
    };

    let mut out = vec![render(header), format!("|{}", "---|".repeat(width))];
    out.extend(rows.iter().skip(1).map(render));
    out.join("\n")
}

/// Split CSV text into records, honoring double-quoted fields, `""`
/// escapes and quoted fields that span lines. Blank lines are skipped.
fn csv_records(input: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => record.push(std::mem::take(&mut field).trim().to_string()),
            '\r' if !quoted => {}
            '\n' if !quoted => {
                record.push(std::mem::take(&mut field).trim().to_string());
                push_record(&mut records, std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }
    record.push(field.trim().to_string());
    push_record(&mut records, record);
    records
}

fn push_record(records: &mut Vec<Vec<String>>, record: Vec<String>) {
    if record.iter().any(|f| !f.is_empty()) {
        records.push(record);
    }
}

/// Visible text of an HTML document, one text run per line.
fn html_to_text(input: &str) -> String {
    let document = Html::parse_document(input);
    let mut lines = Vec::new();

    for node in document.tree.root().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| matches!(e.name(), "script" | "style"))
        });
        let trimmed = text.trim();
        if !hidden && !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
    }

    if lines.is_empty() {
        warn!("HTML document has no visible text");
    }
    lines.join("\n")
}
