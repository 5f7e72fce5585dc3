//! Paginated "fetch-until" loop.
//!
//! Pages are requested strictly one after another so that offset math stays
//! correct. After every page `offset += raw_count`, and the loop continues
//! while [`should_continue`] holds for the signed target count:
//!
//! - `target > 0`: until `offset >= target`
//! - `target < 0`: until a page comes back empty
//! - `target == 0`: until a page is shorter than the requested page size

use async_trait::async_trait;

use crate::error::{AppError, Result};

/// Query parameters for one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageParams {
    /// Requested page size
    pub n: usize,
    pub offset: usize,
    /// Extra query parameters sent with every page
    pub query: Vec<(String, String)>,
}

impl PageParams {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            offset: 0,
            query: Vec::new(),
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// One fetched page.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Number of entries the server returned, before any client filtering
    pub raw_count: usize,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>) -> Self {
        let raw_count = items.len();
        Self { items, raw_count }
    }
}

/// Something that can serve pages.
#[async_trait(?Send)]
pub trait PageSource {
    type Item;

    async fn fetch_page(&self, params: &PageParams) -> Result<Page<Self::Item>>;
}

/// Continuation policy. Pure function of the last page and the target.
pub fn should_continue(last_page_items: usize, page_size: usize, offset: usize, target: i64) -> bool {
    if target > 0 {
        (offset as u64) < target as u64
    } else if target < 0 {
        last_page_items > 0
    } else {
        last_page_items == page_size
    }
}

/// Summary of a completed loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    pub pages: usize,
    pub items: usize,
    /// Final offset
    pub offset: usize,
}

type PageHandler<'a, T> = Box<dyn FnMut(&[T]) + 'a>;
type DoneHandler<'a> = Box<dyn FnOnce(bool) + 'a>;

/// Builder for one paginated run.
pub struct Bulk<'a, T> {
    params: PageParams,
    target: i64,
    handle: Option<PageHandler<'a, T>>,
    done: Option<DoneHandler<'a>>,
}

impl<'a, T> Bulk<'a, T> {
    pub fn new(params: PageParams) -> Self {
        Self {
            params,
            target: -1,
            handle: None,
            done: None,
        }
    }

    /// Signed target count. Defaults to `-1` (fetch everything).
    pub fn target(mut self, target: i64) -> Self {
        self.target = target;
        self
    }

    /// Called after every successful page, before the continuation check.
    pub fn on_page(mut self, handle: impl FnMut(&[T]) + 'a) -> Self {
        self.handle = Some(Box::new(handle));
        self
    }

    /// Called exactly once when the loop exits; `false` only if a fetch failed.
    pub fn on_done(mut self, done: impl FnOnce(bool) + 'a) -> Self {
        self.done = Some(Box::new(done));
        self
    }

    pub async fn run<S>(mut self, source: &S) -> Result<BulkOutcome>
    where
        S: PageSource<Item = T> + ?Sized,
    {
        let result = self.drive(source).await;
        if let Some(done) = self.done.take() {
            done(result.is_ok());
        }
        result
    }

    async fn drive<S>(&mut self, source: &S) -> Result<BulkOutcome>
    where
        S: PageSource<Item = T> + ?Sized,
    {
        if self.params.n == 0 {
            return Err(AppError::validation("page size must be > 0"));
        }

        let mut outcome = BulkOutcome {
            offset: self.params.offset,
            ..BulkOutcome::default()
        };

        loop {
            let page = source.fetch_page(&self.params).await?;
            self.params.offset += page.raw_count;
            outcome.pages += 1;
            outcome.items += page.items.len();
            outcome.offset = self.params.offset;

            if let Some(handle) = self.handle.as_mut() {
                handle(&page.items);
            }

            // No progress with a fixed target would loop forever.
            if self.target > 0 && page.raw_count == 0 {
                break;
            }
            if !should_continue(page.items.len(), self.params.n, self.params.offset, self.target) {
                break;
            }
        }

        log::debug!(
            "Bulk fetch finished after {} pages ({} items)",
            outcome.pages,
            outcome.items
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;

    /// Serves pages of the given sizes, recording the offsets it was asked for.
    struct ScriptedSource {
        sizes: Vec<usize>,
        fail_at: Option<usize>,
        offsets: RefCell<Vec<usize>>,
    }

    impl ScriptedSource {
        fn new(sizes: &[usize]) -> Self {
            Self {
                sizes: sizes.to_vec(),
                fail_at: None,
                offsets: RefCell::new(Vec::new()),
            }
        }
    }

    #[async_trait(?Send)]
    impl PageSource for ScriptedSource {
        type Item = usize;

        async fn fetch_page(&self, params: &PageParams) -> Result<Page<usize>> {
            let call = self.offsets.borrow().len();
            self.offsets.borrow_mut().push(params.offset);
            if self.fail_at == Some(call) {
                return Err(AppError::payload("scripted failure"));
            }
            let size = self.sizes.get(call).copied().unwrap_or(0);
            Ok(Page::new((0..size).map(|i| params.offset + i).collect()))
        }
    }

    #[test]
    fn test_predicate() {
        assert!(should_continue(100, 100, 100, 250));
        assert!(!should_continue(50, 100, 250, 250));
        assert!(should_continue(3, 100, 3, -1));
        assert!(!should_continue(0, 100, 3, -1));
        assert!(should_continue(100, 100, 100, 0));
        assert!(!should_continue(99, 100, 199, 0));
    }

    #[tokio::test]
    async fn test_positive_target() {
        let source = ScriptedSource::new(&[100, 100, 50, 100]);
        let outcome = Bulk::new(PageParams::new(100))
            .target(250)
            .run(&source)
            .await
            .unwrap();

        assert_eq!(*source.offsets.borrow(), vec![0, 100, 200]);
        assert_eq!(outcome.pages, 3);
        assert_eq!(outcome.offset, 250);
    }

    #[tokio::test]
    async fn test_negative_target_runs_until_empty_page() {
        let source = ScriptedSource::new(&[10, 3, 7, 0, 5]);
        let outcome = Bulk::new(PageParams::new(10))
            .target(-1)
            .run(&source)
            .await
            .unwrap();

        assert_eq!(outcome.pages, 4);
        assert_eq!(outcome.items, 20);
        assert_eq!(*source.offsets.borrow(), vec![0, 10, 13, 20]);
    }

    #[tokio::test]
    async fn test_zero_target_runs_until_short_page() {
        let source = ScriptedSource::new(&[10, 10, 4, 10]);
        let outcome = Bulk::new(PageParams::new(10))
            .target(0)
            .run(&source)
            .await
            .unwrap();

        assert_eq!(outcome.pages, 3);
        assert_eq!(outcome.items, 24);
    }

    #[tokio::test]
    async fn test_handle_and_done_callbacks() {
        let source = ScriptedSource::new(&[2, 2, 0]);
        let seen = RefCell::new(Vec::new());
        let done = Cell::new(None);

        Bulk::new(PageParams::new(2))
            .on_page(|items: &[usize]| seen.borrow_mut().extend_from_slice(items))
            .on_done(|ok| done.set(Some(ok)))
            .run(&source)
            .await
            .unwrap();

        assert_eq!(*seen.borrow(), vec![0, 1, 2, 3]);
        assert_eq!(done.get(), Some(true));
    }

    #[tokio::test]
    async fn test_failure_reports_done_false_and_keeps_partial_pages() {
        let mut source = ScriptedSource::new(&[5, 5, 5]);
        source.fail_at = Some(1);
        let seen = Cell::new(0);
        let done = Cell::new(None);

        let result = Bulk::new(PageParams::new(5))
            .on_page(|items: &[usize]| seen.set(seen.get() + items.len()))
            .on_done(|ok| done.set(Some(ok)))
            .run(&source)
            .await;

        assert!(result.is_err());
        assert_eq!(seen.get(), 5);
        assert_eq!(done.get(), Some(false));
    }

    #[tokio::test]
    async fn test_empty_first_page_is_success() {
        let source = ScriptedSource::new(&[]);
        let done = Cell::new(None);
        let outcome = Bulk::new(PageParams::new(5))
            .on_done(|ok| done.set(Some(ok)))
            .run(&source)
            .await
            .unwrap();
        assert_eq!(outcome.items, 0);
        assert_eq!(done.get(), Some(true));
    }
}
