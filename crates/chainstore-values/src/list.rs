//! Lists of values
//!
//! A [`List`] keeps one record per element and stores the element addresses
//! in a manifest with the list layout. Elements created in this process stay
//! resident until the manifest listing them is written; after that they are
//! known by address and share the LRU cache with elements decoded on access.
//!
//! `set`, `insert` and `push` always create a new element record. Edits made
//! through an element handle keep that element's address, so the manifest
//! does not change.

use crate::value::Value;
use crate::var::Var;
use chainstore_common::{Error, RecordAddress, Result};
use chainstore_storage::manifest::{self, ManifestLayout, ManifestPage};
use chainstore_storage::{
    Address, CacheStats, CoalescedWriter, ErrorSink, LruCache, StoreContext, WriteFuture,
    WriteTarget,
};
use futures::FutureExt;
use futures::future;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, trace};

type ElementCache = LruCache<RecordAddress, Arc<Var>>;

#[derive(Clone)]
enum Element {
    /// Created in this process; its record may still be in flight
    Live(Arc<Var>),
    /// Known only by address
    Stored(RecordAddress),
}

impl Element {
    fn address(&self) -> Address {
        match self {
            Self::Live(var) => var.address(),
            Self::Stored(address) => Address::resolved(*address),
        }
    }
}

struct ListState {
    elements: Vec<Element>,
    pages: Vec<ManifestPage>,
    /// Record the first manifest write takes over as its root page
    home: Option<Address>,
    handle: Option<Address>,
}

/// Writes the element manifest once every element address is known
struct ElementsWrite {
    ctx: Arc<StoreContext>,
    state: Arc<Mutex<ListState>>,
    cache: Arc<ElementCache>,
}

impl WriteTarget for ElementsWrite {
    fn write(&self) -> WriteFuture {
        let (elements, mut existing, home) = {
            let state = self.state.lock();
            (state.elements.clone(), state.pages.clone(), state.home.clone())
        };
        let ctx = Arc::clone(&self.ctx);
        let state = Arc::clone(&self.state);
        let cache = Arc::clone(&self.cache);

        async move {
            if existing.is_empty()
                && let Some(home) = home
                && let Some(address) = home.wait_reusable().await
            {
                existing.push(ManifestPage::placeholder(address));
            }
            let pending: Vec<Address> = elements.iter().map(Element::address).collect();
            let addresses = future::try_join_all(pending.iter().map(Address::wait)).await?;
            let outcome = manifest::persist(
                ctx.backend().as_ref(),
                ManifestLayout::LIST,
                &addresses,
                &existing,
                ctx.config().page_limit,
            )?;

            let mut state = state.lock();
            state.pages = outcome.pages;
            state.home = None;
            retire(&mut state.elements, &elements, &addresses, &cache);
            Ok(outcome.root)
        }
        .boxed()
    }
}

/// Turn elements the manifest now lists into `Stored` ones, handing their
/// handles to the cache
fn retire(
    elements: &mut [Element],
    written: &[Element],
    addresses: &[RecordAddress],
    cache: &ElementCache,
) {
    let written: HashMap<usize, RecordAddress> = written
        .iter()
        .zip(addresses)
        .filter_map(|(element, address)| match element {
            Element::Live(var) => Some((Arc::as_ptr(var).addr(), *address)),
            Element::Stored(_) => None,
        })
        .collect();
    let mut retired = 0usize;
    for element in elements.iter_mut() {
        if let Element::Live(var) = element
            && let Some(address) = written.get(&Arc::as_ptr(var).addr())
        {
            cache.insert(*address, Arc::clone(var));
            *element = Element::Stored(*address);
            retired += 1;
        }
    }
    trace!("Retired {} written list elements", retired);
}

/// Ordered list of stored values
pub struct List {
    ctx: Arc<StoreContext>,
    state: Arc<Mutex<ListState>>,
    writer: Arc<CoalescedWriter>,
    cache: Arc<ElementCache>,
}

impl List {
    fn with_state(ctx: Arc<StoreContext>, state: ListState) -> Self {
        let writer = CoalescedWriter::new("list", Arc::clone(ctx.executor()));
        let cache = Arc::new(LruCache::new(ctx.config().list_cache_entries));
        Self {
            ctx,
            state: Arc::new(Mutex::new(state)),
            writer,
            cache,
        }
    }

    /// Store every value as an element and schedule the manifest
    ///
    /// Nested lists become nested list elements.
    pub fn new(ctx: Arc<StoreContext>, values: Vec<Value>) -> Result<Self> {
        Self::create(ctx, values, None)
    }

    /// Like [`List::new`], writing the root page over the record at `home`
    pub(crate) fn replacing(
        ctx: Arc<StoreContext>,
        values: Vec<Value>,
        home: Address,
    ) -> Result<Self> {
        Self::create(ctx, values, Some(home))
    }

    fn create(ctx: Arc<StoreContext>, values: Vec<Value>, home: Option<Address>) -> Result<Self> {
        let elements = values
            .into_iter()
            .map(|value| create(&ctx, value))
            .collect::<Result<Vec<_>>>()?;
        let list = Self::with_state(
            ctx,
            ListState {
                elements,
                pages: Vec::new(),
                home,
                handle: None,
            },
        );
        list.schedule();
        Ok(list)
    }

    /// Open the list whose root page is `root`; elements load lazily
    pub fn load(ctx: Arc<StoreContext>, root: RecordAddress) -> Result<Self> {
        let (entries, pages) = manifest::traverse(ctx.backend().as_ref(), ManifestLayout::LIST, root)?;
        debug!("Loaded list {} ({} elements, {} pages)", root, entries.len(), pages.len());
        Ok(Self::with_state(
            ctx,
            ListState {
                elements: entries.into_iter().map(Element::Stored).collect(),
                pages,
                home: None,
                handle: Some(Address::resolved(root)),
            },
        ))
    }

    fn schedule(&self) {
        let target = Arc::new(ElementsWrite {
            ctx: Arc::clone(&self.ctx),
            state: Arc::clone(&self.state),
            cache: Arc::clone(&self.cache),
        });
        let handle = self.writer.request_write(target);
        self.state.lock().handle = Some(handle);
    }

    pub fn len(&self) -> usize {
        self.state.lock().elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn resolve(&self, element: Element) -> Result<Arc<Var>> {
        match element {
            Element::Live(var) => Ok(var),
            Element::Stored(address) => {
                if let Some(var) = self.cache.get(&address) {
                    return Ok(var);
                }
                let var = Arc::new(Var::load(Arc::clone(&self.ctx), address)?);
                self.cache.insert(address, Arc::clone(&var));
                Ok(var)
            }
        }
    }

    /// Handle of the element at `index`
    pub fn element(&self, index: usize) -> Result<Arc<Var>> {
        let element = {
            let state = self.state.lock();
            state.elements.get(index).cloned().ok_or(Error::IndexOutOfRange {
                index,
                len: state.elements.len(),
            })?
        };
        self.resolve(element)
    }

    pub fn get(&self, index: usize) -> Result<Value> {
        self.element(index)?.get()
    }

    pub fn push(&self, value: Value) -> Result<()> {
        let element = create(&self.ctx, value)?;
        self.state.lock().elements.push(element);
        self.schedule();
        Ok(())
    }

    /// Append every value, flattening nested lists into this one
    pub fn extend<I: IntoIterator<Item = Value>>(&self, values: I) -> Result<()> {
        let mut flat = Vec::new();
        flatten(values, &mut flat);
        let elements = flat
            .into_iter()
            .map(|value| create(&self.ctx, value))
            .collect::<Result<Vec<_>>>()?;
        if elements.is_empty() {
            return Ok(());
        }
        self.state.lock().elements.extend(elements);
        self.schedule();
        Ok(())
    }

    /// Insert before `index`; `index == len` appends
    pub fn insert(&self, index: usize, value: Value) -> Result<()> {
        let mut state = self.state.lock();
        let len = state.elements.len();
        if index > len {
            return Err(Error::IndexOutOfRange { index, len });
        }
        let element = create(&self.ctx, value)?;
        state.elements.insert(index, element);
        drop(state);
        self.schedule();
        Ok(())
    }

    /// Replace the element at `index` with a new record
    pub fn set(&self, index: usize, value: Value) -> Result<()> {
        let mut state = self.state.lock();
        let len = state.elements.len();
        if index >= len {
            return Err(Error::IndexOutOfRange { index, len });
        }
        let element = create(&self.ctx, value)?;
        let old = std::mem::replace(&mut state.elements[index], element);
        drop(state);
        if let Element::Stored(address) = old {
            self.cache.invalidate(&address);
        }
        self.schedule();
        Ok(())
    }

    /// Remove the last element and return its value
    pub fn pop(&self) -> Result<Option<Value>> {
        let Some(element) = self.state.lock().elements.pop() else {
            return Ok(None);
        };
        self.schedule();
        self.take(element).map(Some)
    }

    /// Remove the element at `index` and return its value
    pub fn remove(&self, index: usize) -> Result<Value> {
        let element = {
            let mut state = self.state.lock();
            let len = state.elements.len();
            if index >= len {
                return Err(Error::IndexOutOfRange { index, len });
            }
            state.elements.remove(index)
        };
        self.schedule();
        self.take(element)
    }

    /// Replace the elements in `range` with `values`
    ///
    /// An empty range inserts; empty `values` deletes.
    pub fn splice(&self, range: Range<usize>, values: Vec<Value>) -> Result<()> {
        let elements = values
            .into_iter()
            .map(|value| create(&self.ctx, value))
            .collect::<Result<Vec<_>>>()?;
        let removed: Vec<Element> = {
            let mut state = self.state.lock();
            let len = state.elements.len();
            if range.start > range.end || range.end > len {
                return Err(Error::IndexOutOfRange {
                    index: range.end.max(range.start),
                    len,
                });
            }
            state.elements.splice(range, elements).collect()
        };
        for element in removed {
            if let Element::Stored(address) = element {
                self.cache.invalidate(&address);
            }
        }
        self.schedule();
        Ok(())
    }

    /// Value of an element that was just removed
    fn take(&self, element: Element) -> Result<Value> {
        let var = self.resolve(element.clone())?;
        if let Element::Stored(address) = element {
            self.cache.invalidate(&address);
        }
        var.get()
    }

    pub fn reverse(&self) {
        self.state.lock().elements.reverse();
        self.schedule();
    }

    /// Replace every element
    pub fn replace(&self, values: Vec<Value>) -> Result<()> {
        let elements = values
            .into_iter()
            .map(|value| create(&self.ctx, value))
            .collect::<Result<Vec<_>>>()?;
        self.state.lock().elements = elements;
        self.cache.clear();
        self.schedule();
        Ok(())
    }

    /// Every element as plain data, loading what is not resident
    pub fn to_values(&self) -> Result<Vec<Value>> {
        let elements = self.state.lock().elements.clone();
        elements
            .into_iter()
            .map(|element| self.resolve(element)?.get())
            .collect()
    }

    /// Root page of the latest scheduled manifest write
    pub fn address(&self) -> Address {
        self.state
            .lock()
            .handle
            .clone()
            .unwrap_or_else(|| Address::failed(Error::internal("list was never written")))
    }

    /// Number of manifest pages last written or loaded
    pub fn page_count(&self) -> usize {
        self.state.lock().pages.len()
    }

    pub fn cache_stats(&self) -> &CacheStats {
        self.cache.stats()
    }

    /// Number of decoded elements held by the cache
    pub fn cached_elements(&self) -> usize {
        self.cache.len()
    }

    /// Element handles held in memory, cached or not yet written
    pub fn resident_elements(&self) -> usize {
        self.live().len() + self.cache.len()
    }

    fn live(&self) -> Vec<Arc<Var>> {
        self.state
            .lock()
            .elements
            .iter()
            .filter_map(|element| match element {
                Element::Live(var) => Some(Arc::clone(var)),
                Element::Stored(_) => None,
            })
            .collect()
    }

    /// Wait for element records and the manifest; returns the first failure
    ///
    /// Cached element handles are flushed too, so edits made through
    /// [`List::element`] are durable once this returns.
    pub fn flush(&self) -> Result<()> {
        let mut handles = self.live();
        handles.extend(self.cache.values());
        let mut first_error = None;
        for var in handles {
            if let Err(e) = var.flush() {
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.writer.wait_idle() {
            first_error.get_or_insert(e);
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Route manifest write failures to `sink`
    pub fn set_error_sink(&self, sink: ErrorSink) {
        self.writer.set_error_sink(sink);
    }
}

fn create(ctx: &Arc<StoreContext>, value: Value) -> Result<Element> {
    Ok(Element::Live(Arc::new(Var::store(Arc::clone(ctx), value)?)))
}

fn flatten<I: IntoIterator<Item = Value>>(values: I, out: &mut Vec<Value>) {
    for value in values {
        match value {
            Value::List(inner) => flatten(inner, out),
            other => out.push(other),
        }
    }
}
