//! Lazy iteration over cursor-paginated list endpoints.
//!
//! A [`Pager`] wraps any function that fetches one page given an optional
//! cursor. Each [`Pager::advance`] fetches exactly one page; nothing is read
//! ahead, and only the current page is held in memory.
//!
//! A pager is driven by one task at a time (`advance` takes `&mut self`).
//! Create one pager per consumer to iterate concurrently.

use crate::{Context, Result};
use std::future::Future;
use std::pin::Pin;

/// One page of a list endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor for the following page. `None` on the last page.
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// A page followed by `next_cursor`, if any.
    pub fn new(items: Vec<T>, next_cursor: Option<String>) -> Self {
        Self { items, next_cursor }
    }

    /// A page with no successor.
    pub fn last(items: Vec<T>) -> Self {
        Self::new(items, None)
    }
}

type PageFuture<T> = Pin<Box<dyn Future<Output = Result<Page<T>>> + Send>>;
type FetchFn<T> = Box<dyn FnMut(Context, Option<String>) -> PageFuture<T> + Send>;

/// Drives a page-fetching function across every page of a list.
///
/// # Examples
///
/// ```no_run
/// use crm_client::{Client, Context, RequestMetadata};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Contact { id: String }
///
/// # async fn example() -> Result<(), crm_client::Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .build()?;
/// let ctx = Context::new();
///
/// let mut pager = client.pager::<Contact>(RequestMetadata::get("/v1/contacts"));
/// while pager.advance(&ctx).await {
///     for contact in pager.items() {
///         println!("{}", contact.id);
///     }
/// }
/// if let Some(err) = pager.error() {
///     eprintln!("listing stopped: {}", err);
/// }
/// # Ok(())
/// # }
/// ```
pub struct Pager<T> {
    fetch: FetchFn<T>,
    cursor: Option<String>,
    started: bool,
    items: Vec<T>,
    error: Option<crate::Error>,
}

impl<T> Pager<T> {
    /// Creates a pager over `fetch`, which is first called without a cursor.
    pub fn new<F, Fut>(mut fetch: F) -> Self
    where
        F: FnMut(Context, Option<String>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Page<T>>> + Send + 'static,
    {
        Self {
            fetch: Box::new(move |ctx, cursor| Box::pin(fetch(ctx, cursor))),
            cursor: None,
            started: false,
            items: Vec::new(),
            error: None,
        }
    }

    /// Fetches the next page.
    ///
    /// Returns `true` if a page was fetched, even an empty one. Returns
    /// `false` without calling the fetch function once the last page has been
    /// seen or after any error; the error is then available from
    /// [`Pager::error`].
    pub async fn advance(&mut self, ctx: &Context) -> bool {
        if self.is_done() {
            return false;
        }

        self.started = true;
        let cursor = self.cursor.take();
        tracing::debug!(cursor = ?cursor, "Fetching page");

        match (self.fetch)(ctx.clone(), cursor).await {
            Ok(page) => {
                self.items = page.items;
                self.cursor = page.next_cursor.filter(|c| !c.is_empty());
                true
            }
            Err(e) => {
                tracing::debug!(error = %e, "Page fetch failed; pager stopped");
                self.items = Vec::new();
                self.error = Some(e);
                false
            }
        }
    }

    /// Whether another call to [`Pager::advance`] would fetch nothing.
    pub fn is_done(&self) -> bool {
        self.error.is_some() || (self.started && self.cursor.is_none())
    }

    /// The items of the most recently fetched page.
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Takes the items of the most recently fetched page.
    pub fn take_items(&mut self) -> Vec<T> {
        std::mem::take(&mut self.items)
    }

    /// The cursor that the next call to [`Pager::advance`] will send.
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// The error that stopped this pager, if any.
    pub fn error(&self) -> Option<&crate::Error> {
        self.error.as_ref()
    }

    /// Calls `f` on every item of every remaining page.
    ///
    /// Stops at the first error, whether from a page fetch or from `f`, and
    /// returns it.
    pub async fn for_each<F>(mut self, ctx: &Context, mut f: F) -> Result<()>
    where
        F: FnMut(T) -> Result<()>,
    {
        while self.advance(ctx).await {
            for item in self.take_items() {
                f(item)?;
            }
        }
        match self.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<T> std::fmt::Debug for Pager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pager")
            .field("cursor", &self.cursor)
            .field("started", &self.started)
            .field("items", &self.items.len())
            .field("error", &self.error)
            .finish()
    }
}
