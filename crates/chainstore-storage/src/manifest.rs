//! Linked manifest pages
//!
//! A manifest stores an ordered list of record addresses across a chain of
//! text records. Page layout:
//!
//! ```text
//! <tag> <next|e> <addr> <addr> ...
//! ```
//!
//! The first page carries the layout's root tag and is the handle callers
//! keep; the others carry its continuation tag. `next` is the canonical
//! address of the following page, `e` marks the last one. Pages are written
//! tail first so every page a reader can reach is already complete.

use chainstore_client::RecordBackend;
use chainstore_common::{Discriminator, Error, PayloadKind, RecordAddress, Result};
use std::collections::HashSet;
use tracing::{debug, trace};

/// Marker in place of a next pointer on the last page
pub const TERMINAL: &str = "e";

/// Root and continuation tags of one manifest flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManifestLayout {
    pub root: Discriminator,
    pub page: Discriminator,
}

impl ManifestLayout {
    /// Element list of a list value
    pub const LIST: Self = Self {
        root: Discriminator::ListRoot,
        page: Discriminator::ListPage,
    };

    /// Chunk list of a chunked payload
    #[must_use]
    pub const fn chunked(kind: PayloadKind) -> Self {
        Self {
            root: Discriminator::ChunkedRoot(kind),
            page: Discriminator::ManifestPage,
        }
    }

    const fn tag(&self, index: usize) -> Discriminator {
        if index == 0 { self.root } else { self.page }
    }
}

/// One written page and the content it holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestPage {
    pub address: RecordAddress,
    pub content: String,
}

impl ManifestPage {
    /// An existing record to reuse as a page; it is always rewritten
    #[must_use]
    pub const fn placeholder(address: RecordAddress) -> Self {
        Self {
            address,
            content: String::new(),
        }
    }
}

/// Result of [`persist`]
#[derive(Debug, Clone)]
pub struct PersistOutcome {
    pub root: RecordAddress,
    pub pages: Vec<ManifestPage>,
}

/// Split `addresses` into per-page batches
///
/// Greedy: each page takes as many addresses as fit after reserving room
/// for a full-length next pointer. An empty list still yields one page.
pub fn paginate(
    layout: ManifestLayout,
    addresses: &[RecordAddress],
    page_limit: usize,
) -> Result<Vec<Vec<RecordAddress>>> {
    let mut batches = Vec::new();
    let mut rest = addresses;
    loop {
        let header = layout.tag(batches.len()).as_str().len() + 1 + RecordAddress::MAX_ENCODED_LEN;
        let mut used = header;
        let mut take = 0;
        for address in rest {
            let cost = 1 + address.encoded_len();
            if used + cost > page_limit {
                break;
            }
            used += cost;
            take += 1;
        }
        if take == 0 && !rest.is_empty() {
            return Err(Error::configuration(format!(
                "page_limit {page_limit} cannot hold a single manifest entry"
            )));
        }
        batches.push(rest[..take].to_vec());
        rest = &rest[take..];
        if rest.is_empty() {
            return Ok(batches);
        }
    }
}

fn render(tag: Discriminator, next: Option<RecordAddress>, batch: &[RecordAddress]) -> String {
    let mut content = String::from(tag.as_str());
    content.push(' ');
    match next {
        Some(next) => content.push_str(&next.to_string()),
        None => content.push_str(TERMINAL),
    }
    for address in batch {
        content.push(' ');
        content.push_str(&address.to_string());
    }
    content
}

/// Write `addresses` as a manifest, reusing `existing` pages in place
///
/// Pages past the end of `existing` are created; reused pages whose content
/// did not change are skipped. Pages of `existing` beyond the new length
/// are left unreferenced.
pub fn persist(
    backend: &dyn RecordBackend,
    layout: ManifestLayout,
    addresses: &[RecordAddress],
    existing: &[ManifestPage],
    page_limit: usize,
) -> Result<PersistOutcome> {
    let batches = paginate(layout, addresses, page_limit)?;
    let mut pages: Vec<Option<ManifestPage>> = vec![None; batches.len()];
    let mut next = None;
    let mut written = 0usize;

    for (i, batch) in batches.iter().enumerate().rev() {
        let content = render(layout.tag(i), next, batch);
        let address = match existing.get(i) {
            Some(page) if page.content == content => page.address,
            Some(page) => {
                backend.edit_text(&page.address, &content)?;
                written += 1;
                page.address
            }
            None => {
                written += 1;
                backend.create_text(&content)?
            }
        };
        trace!("Manifest page {} at {} ({} entries)", i, address, batch.len());
        next = Some(address);
        pages[i] = Some(ManifestPage { address, content });
    }

    let pages: Vec<ManifestPage> = pages.into_iter().flatten().collect();
    let root = pages
        .first()
        .map(|page| page.address)
        .ok_or_else(|| Error::internal("manifest produced no pages"))?;
    debug!(
        "Persisted manifest {} ({} entries, {} pages, {} written)",
        root,
        addresses.len(),
        pages.len(),
        written
    );
    Ok(PersistOutcome { root, pages })
}

fn parse_address(page: RecordAddress, token: &str) -> Result<RecordAddress> {
    token
        .parse()
        .map_err(|_| Error::malformed(page, format!("bad address token {token:?}")))
}

/// Read a manifest starting at `root`
///
/// Returns the concatenated entries and the pages they came from.
pub fn traverse(
    backend: &dyn RecordBackend,
    layout: ManifestLayout,
    root: RecordAddress,
) -> Result<(Vec<RecordAddress>, Vec<ManifestPage>)> {
    let mut entries = Vec::new();
    let mut pages = Vec::new();
    let mut visited = HashSet::new();
    let mut current = Some(root);

    while let Some(address) = current {
        if !visited.insert(address) {
            return Err(Error::malformed(address, "manifest pages form a cycle"));
        }
        let content = backend.read_text(&address)?;
        let body = layout.tag(pages.len()).expect(address, &content)?;
        let body = body
            .strip_prefix(' ')
            .ok_or_else(|| Error::malformed(address, "missing next pointer"))?;

        let mut tokens = body.split(' ');
        current = match tokens.next() {
            Some(TERMINAL) => None,
            Some(next) => Some(parse_address(address, next)?),
            None => return Err(Error::malformed(address, "missing next pointer")),
        };
        for token in tokens {
            entries.push(parse_address(address, token)?);
        }
        pages.push(ManifestPage { address, content });
    }

    debug!(
        "Traversed manifest {} ({} entries, {} pages)",
        root,
        entries.len(),
        pages.len()
    );
    Ok((entries, pages))
}
