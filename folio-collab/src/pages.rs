//! Page tree operations.
//!
//! Every operation is a single-record write against the [`PageStore`]. Order
//! keys come from [`OrderedSiblingSet`]; only the page being created or moved
//! ever gets a new key.

use crate::clock::Clock;
use crate::engine::{DocumentProvisioner, EngineError};
use crate::store::{PageStore, StoreError};
use folio_core::ordering::{sort_siblings, OrderedSiblingSet, Placement};
use folio_core::{DocId, DocumentId, NewPage, Page, PageId, PagePatch};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageError {
    NotFound(PageId),
    /// The requested parent is itself a sub-page.
    NestingTooDeep(PageId),
    ParentInOtherDocument(PageId),
    /// The editor document could not be created; no page row was written.
    Provisioning(EngineError),
    Store(StoreError),
}

impl fmt::Display for PageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageError::NotFound(id) => write!(f, "Page not found: {id}"),
            PageError::NestingTooDeep(id) => write!(f, "Page {id} is a sub-page and cannot have children"),
            PageError::ParentInOtherDocument(id) => write!(f, "Parent page {id} belongs to another document"),
            PageError::Provisioning(e) => write!(f, "Document provisioning failed: {e}"),
            PageError::Store(e) => write!(f, "Store error: {e}"),
        }
    }
}

impl std::error::Error for PageError {}

impl From<StoreError> for PageError {
    fn from(e: StoreError) -> Self {
        PageError::Store(e)
    }
}

/// A top-level page with its sub-pages, both in display order.
#[derive(Debug, Clone, PartialEq)]
pub struct PageNode {
    pub page: Page,
    pub children: Vec<Page>,
    /// A sub-page whose parent row is gone, listed at the top level.
    pub orphaned: bool,
}

pub struct PageTreeService {
    store: Arc<dyn PageStore>,
    provisioner: Arc<dyn DocumentProvisioner>,
    clock: Arc<dyn Clock>,
}

impl PageTreeService {
    pub fn new(
        store: Arc<dyn PageStore>,
        provisioner: Arc<dyn DocumentProvisioner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            provisioner,
            clock,
        }
    }

    /// Append a page to its sibling group. The editor document is provisioned
    /// before the row is written, so the returned page is immediately editable.
    pub async fn create(
        &self,
        document_id: &DocumentId,
        title: &str,
        parent: Option<&PageId>,
    ) -> Result<Page, PageError> {
        if let Some(parent_id) = parent {
            let parent_page = self
                .store
                .get_page(parent_id)
                .await?
                .ok_or_else(|| PageError::NotFound(parent_id.clone()))?;
            if parent_page.is_subpage() {
                return Err(PageError::NestingTooDeep(parent_id.clone()));
            }
            if &parent_page.document_id != document_id {
                return Err(PageError::ParentInOtherDocument(parent_id.clone()));
            }
        }

        let siblings = self.store.pages_by_parent(document_id, parent).await?;
        let order_key = OrderedSiblingSet::from_siblings(&siblings).append_key();

        let doc_id = DocId::generate();
        self.provisioner
            .create_document(&doc_id, &[])
            .await
            .map_err(PageError::Provisioning)?;

        let page = self
            .store
            .insert_page(NewPage {
                document_id: document_id.clone(),
                parent_page_id: parent.cloned(),
                order_key,
                title: title.to_string(),
                doc_id,
                created_at: self.clock.now(),
            })
            .await?;
        log::debug!("created page {} in {} with key {}", page.id, document_id, order_key);
        Ok(page)
    }

    /// Move a page within its own sibling group, before `before` or to the end.
    ///
    /// A `before` target that is gone or lives in another group resolves to
    /// the end. Reordering a page that no longer exists does nothing.
    pub async fn reorder(&self, page_id: &PageId, before: Option<&PageId>) -> Result<(), PageError> {
        let Some(page) = self.store.get_page(page_id).await? else {
            log::debug!("reorder of missing page {page_id} ignored");
            return Ok(());
        };

        let siblings = self
            .store
            .pages_by_parent(&page.document_id, page.parent_page_id.as_ref())
            .await?;
        let mut set = OrderedSiblingSet::from_siblings(&siblings);

        let placement = match before {
            Some(target) if set.contains(target) => Placement::Before(target.clone()),
            Some(target) => {
                log::debug!("reorder target {target} not among siblings of {page_id}; appending");
                Placement::End
            }
            None => Placement::End,
        };
        let key = set.key_for(Some(&page.id), &placement);
        if key == page.order_key {
            return Ok(());
        }

        set.insert(page.id.clone(), key, page.created_at);
        if set.has_exhausted_gap() {
            log::warn!(
                "order keys under {:?} in {} can no longer be split",
                page.parent_page_id,
                page.document_id
            );
        }

        match self.store.patch_page(page_id, PagePatch::OrderKey(key)).await {
            Ok(_) => Ok(()),
            // Removed concurrently
            Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn rename(&self, page_id: &PageId, title: &str) -> Result<(), PageError> {
        self.patch(page_id, PagePatch::Title(title.to_string())).await
    }

    pub async fn set_icon(&self, page_id: &PageId, icon: Option<&str>) -> Result<(), PageError> {
        self.patch(page_id, PagePatch::Icon(icon.map(str::to_string))).await
    }

    async fn patch(&self, page_id: &PageId, patch: PagePatch) -> Result<(), PageError> {
        match self.store.patch_page(page_id, patch).await {
            Ok(_) => Ok(()),
            Err(StoreError::NotFound(_)) => Err(PageError::NotFound(page_id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the page row only. Sub-pages and the editor document stay.
    pub async fn remove(&self, page_id: &PageId) -> Result<(), PageError> {
        if self.store.delete_page(page_id).await? {
            log::debug!("removed page {page_id}");
        }
        Ok(())
    }

    /// One sibling group when `parent` is given, otherwise every page of the
    /// document. Both in key order.
    pub async fn list(
        &self,
        document_id: &DocumentId,
        parent: Option<&PageId>,
    ) -> Result<Vec<Page>, PageError> {
        let mut pages = match parent {
            Some(_) => self.store.pages_by_parent(document_id, parent).await?,
            None => self.store.pages_by_document(document_id).await?,
        };
        sort_siblings(&mut pages);
        Ok(pages)
    }

    /// Group every page of the document for tree rendering.
    pub async fn tree(&self, document_id: &DocumentId) -> Result<Vec<PageNode>, PageError> {
        let pages = self.store.pages_by_document(document_id).await?;

        let mut roots = Vec::new();
        let mut children: HashMap<PageId, Vec<Page>> = HashMap::new();
        for page in pages {
            match page.parent_page_id.clone() {
                None => roots.push(page),
                Some(parent) => children.entry(parent).or_default().push(page),
            }
        }
        sort_siblings(&mut roots);

        let mut nodes: Vec<PageNode> = roots
            .into_iter()
            .map(|page| {
                let mut kids = children.remove(&page.id).unwrap_or_default();
                sort_siblings(&mut kids);
                PageNode {
                    page,
                    children: kids,
                    orphaned: false,
                }
            })
            .collect();

        let mut orphans: Vec<Page> = children.into_values().flatten().collect();
        sort_siblings(&mut orphans);
        nodes.extend(orphans.into_iter().map(|page| PageNode {
            page,
            children: Vec::new(),
            orphaned: true,
        }));
        Ok(nodes)
    }

    /// The page selected when a document is opened.
    pub async fn first_page(&self, document_id: &DocumentId) -> Result<Option<Page>, PageError> {
        let mut top = self.store.pages_by_parent(document_id, None).await?;
        sort_siblings(&mut top);
        Ok(top.into_iter().next())
    }
}
