//! Page walking shared by the registry and directory fetches.
//!
//! Both walkers fail fast: the first page error stops the walk and is returned
//! together with the items gathered so far.

use crate::error::GroupSyncError;
use crate::telemetry::Telemetry;
use std::fmt;
use std::future::Future;
use tracing::debug;

/// One page of a numbered listing, as returned by the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_pages: u32
}

/// One page of a token-continued listing, as returned by the directory.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenPage<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>
}

/// A fetch that failed part-way.
pub struct PartialFetch<T> {
    pub items: Vec<T>,
    pub error: GroupSyncError
}

impl<T> PartialFetch<T> {
    pub fn into_error(self) -> GroupSyncError {
        self.error
    }
}

impl<T> fmt::Debug for PartialFetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartialFetch")
            .field("items", &self.items.len())
            .field("error", &self.error)
            .finish()
    }
}

impl<T> From<PartialFetch<T>> for GroupSyncError {
    fn from(partial: PartialFetch<T>) -> Self {
        partial.error
    }
}

pub type FetchResult<T> = Result<Vec<T>, PartialFetch<T>>;

/// Walks pages `1..` until the reported page count is reached.
pub async fn fetch_numbered_pages<T, F, Fut>(
    context: &str,
    page_size: u32,
    max_pages: u32,
    mut fetch_page: F
) -> FetchResult<T>
where
    F: FnMut(u32, u32) -> Fut,
    Fut: Future<Output = Result<Page<T>, GroupSyncError>>
{
    let mut items = Vec::new();
    let mut page_number = 1;

    loop {
        if page_number > max_pages {
            return Err(PartialFetch {
                items,
                error: GroupSyncError::PaginationOverflow {
                    context: context.to_string(),
                    max_pages
                }
            });
        }

        let page = match fetch_page(page_number, page_size).await {
            Ok(page) => page,
            Err(error) => return Err(PartialFetch { items, error })
        };
        Telemetry::record_page(context);
        debug!(
            context,
            page = page_number,
            total_pages = page.total_pages,
            items = page.items.len(),
            "Fetched page"
        );
        items.extend(page.items);

        if page.total_pages <= page_number {
            break;
        }
        page_number += 1;
    }

    Ok(items)
}

/// Follows continuation tokens until a page reports none.
pub async fn fetch_token_pages<T, F, Fut>(
    context: &str,
    max_pages: u32,
    mut fetch_page: F
) -> FetchResult<T>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<TokenPage<T>, GroupSyncError>>
{
    let mut items = Vec::new();
    let mut page_token: Option<String> = None;
    let mut pages = 0u32;

    loop {
        if pages >= max_pages {
            return Err(PartialFetch {
                items,
                error: GroupSyncError::PaginationOverflow {
                    context: context.to_string(),
                    max_pages
                }
            });
        }

        let page = match fetch_page(page_token.clone()).await {
            Ok(page) => page,
            Err(error) => return Err(PartialFetch { items, error })
        };
        pages += 1;
        Telemetry::record_page(context);
        items.extend(page.items);

        let next = page.next_page_token.filter(|t| !t.is_empty());
        match next {
            None => break,
            Some(token) if page_token.as_deref() == Some(token.as_str()) => {
                return Err(PartialFetch {
                    items,
                    error: GroupSyncError::PaginationStalled {
                        context: context.to_string()
                    }
                });
            }
            Some(token) => page_token = Some(token)
        }
    }

    Ok(items)
}
