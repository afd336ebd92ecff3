use std::future::Future;
use std::ops::AddAssign;

use derive_more::Constructor;
use log::{debug, warn};

use crate::api::Result;

/// Absolute cap on accumulated items for one paginated source.
pub const MAX_ITEMS: usize = 1000;
pub const FIRST_PAGE_NUMBER: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Constructor)]
pub struct Page {
    pub page_no: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, PartialEq, Constructor)]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
}

#[derive(Constructor)]
struct Paginator {
    page_no: u32,
    page_size: u32,
    remaining: usize,
}

impl Paginator {
    fn next_page(&mut self) -> Option<Page> {
        if self.remaining == 0 {
            return None;
        }
        let page = Page::new(self.page_no, self.page_size);
        self.page_no.add_assign(1);
        Some(page)
    }

    fn consumed(&mut self, items: usize) {
        self.remaining = self.remaining.saturating_sub(items);
    }
}

/// Drives a page-number source until it runs dry.
///
/// Stops on a missing or failed page, an empty or short page, or once `MAX_ITEMS` items were collected. An unusable
/// first page gives an empty list.
pub async fn paginate_offset<T, F, Fut>(page_size: u32, mut fetch_page: F) -> Vec<T>
where
    F: FnMut(Page) -> Fut,
    Fut: Future<Output = Result<Option<Vec<T>>>>,
{
    let page_size = page_size.max(1);
    let mut paginator = Paginator::new(FIRST_PAGE_NUMBER, page_size, MAX_ITEMS);
    let mut items = Vec::new();
    while let Some(page) = paginator.next_page() {
        let batch = match fetch_page(page).await {
            Ok(Some(batch)) => batch,
            Ok(None) => {
                debug!("No data for page {}", page.page_no);
                break;
            }
            Err(err) => {
                warn!("Failed to fetch page {}: {}", page.page_no, err);
                break;
            }
        };
        let received = batch.len();
        if received == 0 {
            break;
        }
        paginator.consumed(received);
        items.extend(batch);
        if received < page_size as usize {
            break;
        }
    }
    if items.len() >= MAX_ITEMS {
        warn!("Pagination stopped at the {} item safety cap", MAX_ITEMS);
        items.truncate(MAX_ITEMS);
    }
    items
}

/// Drives a cursor source until it reports no further page.
///
/// Same stop rules as `paginate_offset`, with "no next page" in place of a short page.
pub async fn paginate_cursor<T, F, Fut>(mut fetch_page: F) -> Vec<T>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Option<CursorPage<T>>>>,
{
    let mut items = Vec::new();
    let mut cursor = None;
    loop {
        let page = match fetch_page(cursor.take()).await {
            Ok(Some(page)) => page,
            Ok(None) => {
                debug!("No data for page after {} items", items.len());
                break;
            }
            Err(err) => {
                warn!("Failed to fetch page after {} items: {}", items.len(), err);
                break;
            }
        };
        if page.items.is_empty() {
            break;
        }
        items.extend(page.items);
        if items.len() >= MAX_ITEMS {
            warn!("Pagination stopped at the {} item safety cap", MAX_ITEMS);
            items.truncate(MAX_ITEMS);
            break;
        }
        match (page.has_next_page, page.end_cursor) {
            (true, Some(end_cursor)) => cursor = Some(end_cursor),
            _ => break,
        }
    }
    items
}
