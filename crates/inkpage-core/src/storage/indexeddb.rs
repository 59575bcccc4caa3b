//! IndexedDB queue storage for WebAssembly.

use super::{BoxFuture, EntryId, NewOfflineEntry, OfflineStore, PendingOfflineEntry, StorageError, StorageResult};
use crate::stroke::PageId;
use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;
use web_sys::{IdbDatabase, IdbObjectStore, IdbObjectStoreParameters, IdbRequest, IdbTransaction, IdbTransactionMode};

const DB_NAME: &str = "inkpage";
const DB_VERSION: u32 = 1;
const STORE_NAME: &str = "pendingStrokes";
const PAGE_INDEX: &str = "pageId";
const QUOTA_EXCEEDED: &str = "QuotaExceededError";

/// IndexedDB-backed queue: one object store keyed by an auto-increment `id`
/// with a secondary index on `pageId`.
///
/// Not Send/Sync; WASM is single-threaded and IndexedDB handles are not thread-safe.
pub struct IndexedDbOfflineStore {
    db: Rc<RefCell<Option<IdbDatabase>>>,
}

impl IndexedDbOfflineStore {
    /// The connection is opened lazily on first use.
    pub fn new() -> Self {
        Self {
            db: Rc::new(RefCell::new(None)),
        }
    }

    async fn get_db(&self) -> StorageResult<IdbDatabase> {
        if let Some(db) = self.db.borrow().as_ref() {
            return Ok(db.clone());
        }

        let window = web_sys::window().ok_or_else(|| StorageError::Other("No window object".to_string()))?;
        let factory = window
            .indexed_db()
            .map_err(|e| StorageError::Other(format!("IndexedDB error: {:?}", e)))?
            .ok_or_else(|| StorageError::Other("IndexedDB not available".to_string()))?;
        let open_request = factory
            .open_with_u32(DB_NAME, DB_VERSION)
            .map_err(|e| StorageError::Other(format!("Failed to open DB: {:?}", e)))?;

        let onupgrade = Closure::once(Box::new(move |event: web_sys::IdbVersionChangeEvent| {
            if let Err(e) = create_schema(&event) {
                log::error!("Failed to create offline queue schema: {:?}", e);
            }
        }) as Box<dyn FnOnce(_)>);
        open_request.set_onupgradeneeded(Some(onupgrade.as_ref().unchecked_ref()));
        onupgrade.forget();

        let db = await_idb_request::<IdbDatabase>(&open_request).await?;
        *self.db.borrow_mut() = Some(db.clone());
        Ok(db)
    }

    fn get_store(&self, db: &IdbDatabase, mode: IdbTransactionMode) -> StorageResult<IdbObjectStore> {
        self.open_store(db, mode).map(|(_, store)| store)
    }

    fn open_store(
        &self,
        db: &IdbDatabase,
        mode: IdbTransactionMode,
    ) -> StorageResult<(IdbTransaction, IdbObjectStore)> {
        let transaction = db
            .transaction_with_str_and_mode(STORE_NAME, mode)
            .map_err(|e| StorageError::Other(format!("Transaction error: {:?}", e)))?;
        let store = transaction
            .object_store(STORE_NAME)
            .map_err(|e| StorageError::Other(format!("Store error: {:?}", e)))?;
        Ok((transaction, store))
    }
}

impl Default for IndexedDbOfflineStore {
    fn default() -> Self {
        Self::new()
    }
}

fn create_schema(event: &web_sys::IdbVersionChangeEvent) -> Result<(), JsValue> {
    let target = event
        .target()
        .ok_or_else(|| JsValue::from_str("upgrade event without target"))?;
    let request: IdbRequest = target.unchecked_into();
    let db: IdbDatabase = request.result()?.unchecked_into();
    if db.object_store_names().contains(STORE_NAME) {
        return Ok(());
    }
    let params = IdbObjectStoreParameters::new();
    params.set_key_path(&JsValue::from_str("id"));
    params.set_auto_increment(true);
    let store = db.create_object_store_with_optional_parameters(STORE_NAME, &params)?;
    store.create_index_with_str(PAGE_INDEX, PAGE_INDEX)?;
    Ok(())
}

fn decode_entries(value: JsValue) -> StorageResult<Vec<PendingOfflineEntry>> {
    let mut entries: Vec<PendingOfflineEntry> =
        serde_wasm_bindgen::from_value(value).map_err(|e| StorageError::Serialization(e.to_string()))?;
    entries.sort_by_key(|e| e.id);
    Ok(entries)
}

impl OfflineStore for IndexedDbOfflineStore {
    fn insert(&self, entry: NewOfflineEntry) -> BoxFuture<'_, StorageResult<EntryId>> {
        Box::pin(async move {
            let value =
                serde_wasm_bindgen::to_value(&entry).map_err(|e| StorageError::Serialization(e.to_string()))?;
            let db = self.get_db().await?;
            let (transaction, store) = self.open_store(&db, IdbTransactionMode::Readwrite)?;
            let committed = transaction_done(&transaction);
            let request = store
                .add(&value)
                .map_err(|e| classify_error(&e, "Add error"))?;
            let key = await_idb_request::<JsValue>(&request).await?;
            // Quota errors usually abort the transaction after the request succeeded.
            committed.await?;
            key.as_f64()
                .map(|k| k as EntryId)
                .ok_or_else(|| StorageError::Other("Non-numeric queue key".to_string()))
        })
    }

    fn get_all(&self) -> BoxFuture<'_, StorageResult<Vec<PendingOfflineEntry>>> {
        Box::pin(async move {
            let db = self.get_db().await?;
            let store = self.get_store(&db, IdbTransactionMode::Readonly)?;
            let request = store
                .get_all()
                .map_err(|e| StorageError::Other(format!("GetAll error: {:?}", e)))?;
            decode_entries(await_idb_request::<JsValue>(&request).await?)
        })
    }

    fn get_by_page(&self, page_id: &PageId) -> BoxFuture<'_, StorageResult<Vec<PendingOfflineEntry>>> {
        let page_id = page_id.clone();
        Box::pin(async move {
            let db = self.get_db().await?;
            let store = self.get_store(&db, IdbTransactionMode::Readonly)?;
            let index = store
                .index(PAGE_INDEX)
                .map_err(|e| StorageError::Other(format!("Index error: {:?}", e)))?;
            let request = index
                .get_all_with_key(&JsValue::from_str(page_id.as_str()))
                .map_err(|e| StorageError::Other(format!("GetAll error: {:?}", e)))?;
            decode_entries(await_idb_request::<JsValue>(&request).await?)
        })
    }

    fn delete(&self, id: EntryId) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            let db = self.get_db().await?;
            let (transaction, store) = self.open_store(&db, IdbTransactionMode::Readwrite)?;
            let committed = transaction_done(&transaction);
            let request = store
                .delete(&JsValue::from_f64(id as f64))
                .map_err(|e| StorageError::Other(format!("Delete error: {:?}", e)))?;
            await_idb_request::<JsValue>(&request).await?;
            committed.await
        })
    }

    fn update(&self, entry: PendingOfflineEntry) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            let id = entry.id;
            let value =
                serde_wasm_bindgen::to_value(&entry).map_err(|e| StorageError::Serialization(e.to_string()))?;
            let db = self.get_db().await?;

            let store = self.get_store(&db, IdbTransactionMode::Readonly)?;
            let request = store
                .get(&JsValue::from_f64(id as f64))
                .map_err(|e| StorageError::Other(format!("Get error: {:?}", e)))?;
            if await_idb_request::<JsValue>(&request).await?.is_undefined() {
                return Err(StorageError::NotFound(id));
            }

            let (transaction, store) = self.open_store(&db, IdbTransactionMode::Readwrite)?;
            let committed = transaction_done(&transaction);
            let request = store
                .put(&value)
                .map_err(|e| classify_error(&e, "Put error"))?;
            await_idb_request::<JsValue>(&request).await?;
            committed.await
        })
    }

    fn count(&self) -> BoxFuture<'_, StorageResult<usize>> {
        Box::pin(async move {
            let db = self.get_db().await?;
            let store = self.get_store(&db, IdbTransactionMode::Readonly)?;
            let request = store
                .count()
                .map_err(|e| StorageError::Other(format!("Count error: {:?}", e)))?;
            let result = await_idb_request::<JsValue>(&request).await?;
            Ok(result.as_f64().unwrap_or(0.0) as usize)
        })
    }
}

fn classify_error(error: &JsValue, context: &str) -> StorageError {
    let name = error
        .dyn_ref::<web_sys::DomException>()
        .map(|e| e.name())
        .or_else(|| error.as_string());
    match name.as_deref() {
        Some(QUOTA_EXCEEDED) => StorageError::QuotaExceeded,
        _ => StorageError::Other(format!("{}: {:?}", context, error)),
    }
}

/// Resolves once the transaction commits. Aborts and errors reject with the
/// transaction's `DOMException` name. Call before awaiting any of its requests
/// so the handlers are in place when it settles.
fn transaction_done(transaction: &IdbTransaction) -> impl std::future::Future<Output = StorageResult<()>> {
    let promise = js_sys::Promise::new(&mut |resolve, reject| {
        let oncomplete = Closure::once(Box::new(move |_: web_sys::Event| {
            let _ = resolve.call0(&JsValue::NULL);
        }) as Box<dyn FnOnce(_)>);

        let failed = transaction.clone();
        let mut reject = Some(reject);
        let onfailure = Closure::wrap(Box::new(move |_: web_sys::Event| {
            let Some(reject) = reject.take() else {
                return;
            };
            let name = failed
                .error()
                .map(|e| e.name())
                .unwrap_or_else(|| "IndexedDB transaction aborted".to_string());
            let _ = reject.call1(&JsValue::NULL, &JsValue::from_str(&name));
        }) as Box<dyn FnMut(_)>);

        transaction.set_oncomplete(Some(oncomplete.as_ref().unchecked_ref()));
        // `error` and `abort` can both fire; only the first one rejects.
        transaction.set_onerror(Some(onfailure.as_ref().unchecked_ref()));
        transaction.set_onabort(Some(onfailure.as_ref().unchecked_ref()));
        oncomplete.forget();
        onfailure.forget();
    });

    let future = JsFuture::from(promise);
    async move {
        future
            .await
            .map(|_| ())
            .map_err(|e| classify_error(&e, "IndexedDB transaction failed"))
    }
}

/// Await an IndexedDB request through a Promise. Rejects with the
/// `DOMException` name so quota exhaustion can be told apart.
async fn await_idb_request<T: JsCast>(request: &IdbRequest) -> StorageResult<T> {
    let promise = js_sys::Promise::new(&mut |resolve, reject| {
        let onsuccess = Closure::once(Box::new(move |event: web_sys::Event| {
            let result = event
                .target()
                .map(|t| t.unchecked_into::<IdbRequest>())
                .and_then(|r| r.result().ok())
                .unwrap_or(JsValue::UNDEFINED);
            let _ = resolve.call1(&JsValue::NULL, &result);
        }) as Box<dyn FnOnce(_)>);

        let onerror = Closure::once(Box::new(move |event: web_sys::Event| {
            let name = event
                .target()
                .map(|t| t.unchecked_into::<IdbRequest>())
                .and_then(|r| r.error().ok().flatten())
                .map(|e| e.name())
                .unwrap_or_else(|| "IndexedDB request failed".to_string());
            let _ = reject.call1(&JsValue::NULL, &JsValue::from_str(&name));
        }) as Box<dyn FnOnce(_)>);

        request.set_onsuccess(Some(onsuccess.as_ref().unchecked_ref()));
        request.set_onerror(Some(onerror.as_ref().unchecked_ref()));
        onsuccess.forget();
        onerror.forget();
    });

    JsFuture::from(promise)
        .await
        .map_err(|e| classify_error(&e, "IndexedDB request failed"))?
        .dyn_into::<T>()
        .map_err(|_| StorageError::Other("Type conversion failed".to_string()))
}
