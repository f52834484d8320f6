//! JavaScript entry points. [`DataViewerHandle`] lives on the page, [`WorkerHandle`] inside the web worker, and the
//! two only exchange plain JSON messages through `postMessage`.

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;
use std::sync::LazyLock;

use futures::channel::mpsc;
use js_sys::{Array, Function, Object, Promise, Reflect};
use serde::Serialize;
use tether::{ChangeEvent, Listen, SessionConfig, SyncError, SyncService, Unlisten};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;

use crate::{
    ControlRequest, Controls, DataViewer, PropertyPanel, TreeViewState, ViewerConfig, Worker,
    WorkerMessage, WorkerRequest, utils,
};

/// localStorage key of the saved tree view state.
const VIEW_STATE_KEY: &str = "jstree";

// putting this inside LOGGER prevents us from accidentally initializing the logger more than once
#[allow(clippy::declare_interior_mutable_const)]
const LOGGER: LazyLock<()> = LazyLock::new(|| {
    utils::set_panic_hook();

    wasm_logger::init(wasm_logger::Config::default());
    log::info!("Logging initialized");
});

fn init_logging() {
    #[allow(clippy::borrow_interior_mutable_const)]
    *LOGGER;
}

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(JsValue::from)
}

fn js_error(e: impl ToString) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn local_storage() -> Option<web_sys::Storage> {
    web_sys::window()?.local_storage().ok().flatten()
}

#[wasm_bindgen]
pub struct DataViewerHandle {
    // never hold this borrow while calling into JS, the callbacks call straight back into us
    viewer: RefCell<DataViewer>,
    post_to_worker: Function,
    on_change: Function,
}

#[wasm_bindgen]
impl DataViewerHandle {
    /// `post_to_worker` receives every request for the worker; `on_change` is called whenever the view should
    /// re-render.
    #[wasm_bindgen(constructor)]
    pub fn new(
        supports_access_policy: bool,
        post_to_worker: Function,
        on_change: Function,
    ) -> Self {
        init_logging();

        let view_state = local_storage()
            .and_then(|storage| storage.get_item(VIEW_STATE_KEY).ok().flatten())
            .and_then(|blob| TreeViewState::parse(&blob));

        Self {
            viewer: RefCell::new(DataViewer::new(supports_access_policy, view_state)),
            post_to_worker,
            on_change,
        }
    }

    /// `page` is `{ host, port, protocol, token?, user?, provider? }` taken from `window.location` and the
    /// sign-in result.
    pub fn start_session(&self, page: JsValue) -> Result<(), JsValue> {
        let _flusher = FlushLater::new(self);
        let page = serde_wasm_bindgen::from_value(page)?;
        self.viewer.borrow_mut().start_session(page);
        Ok(())
    }

    pub fn handle_worker_message(&self, message: JsValue) -> Result<(), JsValue> {
        let _flusher = FlushLater::new(self);
        let message: WorkerMessage = serde_wasm_bindgen::from_value(message)?;
        self.viewer.borrow_mut().handle_worker_message(message);
        Ok(())
    }

    pub fn add_node(&self) -> Result<String, JsValue> {
        let _flusher = FlushLater::new(self);
        self.viewer.borrow_mut().add_node().map_err(js_error)
    }

    pub fn begin_rename(&self, id: String) -> Result<(), JsValue> {
        let _flusher = FlushLater::new(self);
        self.viewer.borrow_mut().begin_rename(&id).map_err(js_error)
    }

    pub fn commit_edit(&self, text: String) -> Result<(), JsValue> {
        let _flusher = FlushLater::new(self);
        self.viewer.borrow_mut().commit_edit(&text).map_err(js_error)
    }

    pub fn cancel_edit(&self) -> Result<(), JsValue> {
        let _flusher = FlushLater::new(self);
        self.viewer.borrow_mut().cancel_edit().map_err(js_error)
    }

    pub fn select(&self, id: Option<String>) -> bool {
        let _flusher = FlushLater::new(self);
        self.viewer.borrow_mut().select(id.as_deref())
    }

    pub fn toggle_open(&self, id: String) -> bool {
        let _flusher = FlushLater::new(self);
        self.viewer.borrow_mut().toggle_open(&id)
    }

    pub fn delete_selected(&self) -> Result<(), JsValue> {
        let _flusher = FlushLater::new(self);
        self.viewer.borrow_mut().delete_selected().map_err(js_error)
    }

    pub fn begin_data_edit(&self) -> Result<(), JsValue> {
        let _flusher = FlushLater::new(self);
        self.viewer.borrow_mut().begin_data_edit().map_err(js_error)
    }

    pub fn save_data(&self, text: String) -> Result<(), JsValue> {
        let _flusher = FlushLater::new(self);
        self.viewer.borrow_mut().save_data(&text).map_err(js_error)
    }

    pub fn cancel_data_edit(&self) -> Result<(), JsValue> {
        let _flusher = FlushLater::new(self);
        self.viewer.borrow_mut().cancel_data_edit().map_err(js_error)
    }

    pub fn rows(&self) -> Result<JsValue, JsValue> {
        to_js(&self.viewer.borrow().rows())
    }

    pub fn property_panel(&self) -> PropertyPanel {
        self.viewer.borrow().property_panel()
    }

    pub fn controls(&self) -> Controls {
        self.viewer.borrow().controls()
    }

    /// Messages for the snackbar, oldest first.
    pub fn take_notifications(&self) -> Result<JsValue, JsValue> {
        to_js(&self.viewer.borrow_mut().take_notifications())
    }
}

impl DataViewerHandle {
    /// Posts queued requests, saves the view state, and asks the page to re-render.
    fn flush(&self) {
        let (requests, view_state) = {
            let mut viewer = self.viewer.borrow_mut();
            (viewer.take_requests(), viewer.view_state())
        };

        for request in requests {
            let posted = to_js(&request).and_then(|message| {
                self.post_to_worker.call1(&JsValue::NULL, &message)
            });
            if let Err(e) = posted {
                log::error!("Could not post {request:?} to the worker: {e:?}");
            }
        }

        if let Some(storage) = local_storage() {
            let _ = storage
                .set_item(VIEW_STATE_KEY, &view_state.to_json())
                .inspect_err(|e| log::warn!("Could not save the tree view state: {e:?}"));
        }

        let _ = self
            .on_change
            .call0(&JsValue::NULL)
            .inspect_err(|e| log::error!("Change callback failed: {e:?}"));
    }
}

/// Flushes the handle when dropped, whichever way the method returns.
struct FlushLater<'a> {
    handle: &'a DataViewerHandle,
}

impl<'a> FlushLater<'a> {
    fn new(handle: &'a DataViewerHandle) -> Self {
        Self { handle }
    }
}

impl<'a> Drop for FlushLater<'a> {
    fn drop(&mut self) {
        self.handle.flush();
    }
}

type Connect = Box<dyn Fn(&SessionConfig) -> Result<JsSync, SyncError>>;

#[wasm_bindgen]
pub struct WorkerHandle {
    worker: Rc<RefCell<Worker<JsSync, Connect>>>,
    post_message: Function,
}

#[wasm_bindgen]
impl WorkerHandle {
    /// `csync` is the client library's factory, called as `csync({ host, port, useSSL })`. `post_message` sends
    /// a message back to the page.
    #[wasm_bindgen(constructor)]
    pub fn new(csync: Function, post_message: Function) -> Self {
        init_logging();

        let connect: Connect = Box::new(move |session: &SessionConfig| {
            let instance = create_instance(&csync, session).map_err(remote_error)?;
            let sync = JsSync { instance };
            sync.authenticate(session);
            Ok(sync)
        });

        Self {
            worker: Rc::new(RefCell::new(Worker::new(ViewerConfig::default(), connect))),
            post_message,
        }
    }

    /// Milliseconds between two [`WorkerHandle::tick`] calls.
    #[wasm_bindgen(getter)]
    pub fn drain_window_ms(&self) -> u32 {
        let window = self.worker.borrow().config().drain_window;
        u32::try_from(window.as_millis()).unwrap_or(u32::MAX)
    }

    pub fn handle_message(&self, message: JsValue) -> Result<(), JsValue> {
        // the page has always sent the bare string "connect" to start listening
        let request = if message.as_string().as_deref() == Some("connect") {
            WorkerRequest::Control(ControlRequest::Connect)
        } else {
            serde_wasm_bindgen::from_value(message)?
        };

        match request {
            WorkerRequest::Write(intent) => {
                // the future owns what it needs, so the borrow ends here
                let echo = self.worker.borrow().perform(intent);
                let post_message = self.post_message.clone();
                wasm_bindgen_futures::spawn_local(async move {
                    post(&post_message, &WorkerMessage::Echo(echo.await));
                });
            }
            WorkerRequest::Control(control) => {
                self.worker
                    .borrow_mut()
                    .handle_control(control)
                    .map_err(js_error)?;
            }
        }
        Ok(())
    }

    /// Forwards one batch of queued changes to the page.
    pub fn tick(&self) {
        let changes = self.worker.borrow_mut().drain();
        for change in changes {
            post(&self.post_message, &WorkerMessage::Change(change));
        }
    }
}

fn post(post_message: &Function, message: &WorkerMessage) {
    let posted = to_js(message).and_then(|message| post_message.call1(&JsValue::NULL, &message));
    if let Err(e) = posted {
        log::error!("Could not post message to the page: {e:?}");
    }
}

fn create_instance(csync: &Function, session: &SessionConfig) -> Result<JsValue, JsValue> {
    let options = Object::new();
    Reflect::set(&options, &"host".into(), &session.host.as_str().into())?;
    Reflect::set(&options, &"port".into(), &f64::from(session.port).into())?;
    Reflect::set(&options, &"useSSL".into(), &session.use_ssl.into())?;
    csync.call1(&JsValue::NULL, &options)
}

fn remote_error(e: JsValue) -> SyncError {
    let message = Reflect::get(&e, &"message".into())
        .ok()
        .and_then(|message| message.as_string())
        .or_else(|| e.as_string())
        .unwrap_or_else(|| format!("{e:?}"));
    SyncError::Remote(message)
}

fn method(target: &JsValue, name: &str) -> Result<Function, SyncError> {
    Reflect::get(target, &name.into())
        .map_err(remote_error)?
        .dyn_into()
        .map_err(|_| SyncError::Remote(format!("{name} is not a function")))
}

async fn call_async(target: JsValue, name: &str, args: Array) -> Result<JsValue, SyncError> {
    let promise: Promise = method(&target, name)?
        .apply(&target, &args)
        .map_err(remote_error)?
        .dyn_into()
        .map_err(|_| SyncError::Remote(format!("{name} did not return a promise")))?;
    JsFuture::from(promise).await.map_err(remote_error)
}

/// The csync JavaScript client behind [`SyncService`].
#[derive(Clone)]
pub struct JsSync {
    instance: JsValue,
}

impl JsSync {
    fn key(&self, key: &str) -> Result<JsValue, SyncError> {
        method(&self.instance, "key")?
            .call1(&self.instance, &key.into())
            .map_err(remote_error)
    }

    fn authenticate(&self, session: &SessionConfig) {
        let args = Array::of2(&session.provider.as_str().into(), &session.token.as_str().into());
        let authenticating = call_async(self.instance.clone(), "authenticate", args);
        wasm_bindgen_futures::spawn_local(async move {
            if let Err(e) = authenticating.await {
                log::error!("Authentication failed: {e}");
            }
        });
    }
}

impl SyncService for JsSync {
    type Handle = JsListenHandle;

    fn write(
        &self,
        key: &str,
        data: serde_json::Value,
    ) -> impl Future<Output = Result<(), SyncError>> {
        let key = self.key(key);
        async move {
            let data = to_js(&data).map_err(remote_error)?;
            call_async(key?, "write", Array::of1(&data)).await?;
            Ok(())
        }
    }

    fn delete(&self, key: &str) -> impl Future<Output = Result<(), SyncError>> {
        let key = self.key(key);
        async move {
            call_async(key?, "delete", Array::new()).await?;
            Ok(())
        }
    }

    fn listen(&self, pattern: &str) -> Result<Listen<Self::Handle>, SyncError> {
        keypath::validate_pattern(pattern)?;
        let key = self.key(pattern)?;
        let (sender, events) = mpsc::unbounded();

        let callback = Closure::<dyn FnMut(JsValue, JsValue)>::new(
            move |error: JsValue, value: JsValue| {
                let change = if error.is_null() || error.is_undefined() {
                    serde_wasm_bindgen::from_value::<ChangeEvent>(value)
                        .map_err(|e| SyncError::Remote(e.to_string()))
                } else {
                    Err(remote_error(error))
                };
                let _ = sender.unbounded_send(change);
            },
        );
        method(&key, "listen")?
            .call1(&key, callback.as_ref())
            .map_err(remote_error)?;

        Ok(Listen {
            events,
            handle: JsListenHandle {
                key: Some(key),
                _callback: Some(callback),
            },
        })
    }
}

pub struct JsListenHandle {
    key: Option<JsValue>,
    // must outlive the listener registered with it
    _callback: Option<Closure<dyn FnMut(JsValue, JsValue)>>,
}

impl Unlisten for JsListenHandle {
    fn unlisten(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        let unlistened =
            method(&key, "unlisten").and_then(|unlisten| unlisten.call0(&key).map_err(remote_error));
        if let Err(e) = unlistened {
            log::error!("Could not unlisten: {e}");
        }
        self._callback = None;
    }
}

impl Drop for JsListenHandle {
    fn drop(&mut self) {
        self.unlisten();
    }
}
