//! Browser page sockets over `web_sys::WebSocket`.
//!
//! Handlers push into a shared buffer that [`SocketHandle::poll_events`] drains.

use super::{Connector, SocketEvent, SocketHandle};
use crate::stroke::PageId;
use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{CloseEvent, ErrorEvent, MessageEvent, WebSocket};

/// Connects to `{ws_base}/ws/pages/{page}`.
#[derive(Debug, Clone)]
pub struct WebSysConnector {
    ws_base: String,
}

impl WebSysConnector {
    pub fn new(ws_base: &str) -> Result<Self, String> {
        if !ws_base.starts_with("ws://") && !ws_base.starts_with("wss://") {
            return Err(format!("Invalid WebSocket URL: {}", ws_base));
        }
        Ok(Self {
            ws_base: ws_base.trim_end_matches('/').to_string(),
        })
    }

    fn page_url(&self, page_id: &PageId) -> String {
        let page: String = js_sys::encode_uri_component(page_id.as_str()).into();
        format!("{}/ws/pages/{}", self.ws_base, page)
    }
}

impl Connector for WebSysConnector {
    fn connect(&self, page_id: &PageId) -> Result<Box<dyn SocketHandle>, String> {
        let ws = WebSocket::new(&self.page_url(page_id)).map_err(|e| format!("Failed to create WebSocket: {:?}", e))?;
        let events: Rc<RefCell<Vec<SocketEvent>>> = Rc::new(RefCell::new(Vec::new()));

        let events_open = events.clone();
        let on_open = Closure::wrap(Box::new(move || {
            events_open.borrow_mut().push(SocketEvent::Opened);
        }) as Box<dyn Fn()>);
        ws.set_onopen(Some(on_open.as_ref().unchecked_ref()));

        let events_msg = events.clone();
        let on_message = Closure::wrap(Box::new(move |e: MessageEvent| {
            if let Ok(text) = e.data().dyn_into::<js_sys::JsString>() {
                events_msg.borrow_mut().push(SocketEvent::Text(text.into()));
            }
        }) as Box<dyn Fn(MessageEvent)>);
        ws.set_onmessage(Some(on_message.as_ref().unchecked_ref()));

        let events_close = events.clone();
        let on_close = Closure::wrap(Box::new(move |_e: CloseEvent| {
            events_close.borrow_mut().push(SocketEvent::Closed);
        }) as Box<dyn Fn(CloseEvent)>);
        ws.set_onclose(Some(on_close.as_ref().unchecked_ref()));

        let events_err = events.clone();
        let on_error = Closure::wrap(Box::new(move |_e: ErrorEvent| {
            events_err
                .borrow_mut()
                .push(SocketEvent::Error("WebSocket error".to_string()));
        }) as Box<dyn Fn(ErrorEvent)>);
        ws.set_onerror(Some(on_error.as_ref().unchecked_ref()));

        Ok(Box::new(WasmSocket {
            ws: Some(ws),
            events,
            _on_open: Some(on_open),
            _on_message: Some(on_message),
            _on_close: Some(on_close),
            _on_error: Some(on_error),
        }))
    }
}

struct WasmSocket {
    ws: Option<WebSocket>,
    events: Rc<RefCell<Vec<SocketEvent>>>,
    // Kept alive for as long as the handlers are installed.
    _on_open: Option<Closure<dyn Fn()>>,
    _on_message: Option<Closure<dyn Fn(MessageEvent)>>,
    _on_close: Option<Closure<dyn Fn(CloseEvent)>>,
    _on_error: Option<Closure<dyn Fn(ErrorEvent)>>,
}

impl SocketHandle for WasmSocket {
    fn poll_events(&mut self) -> Vec<SocketEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    fn close(&mut self) {
        if let Some(ws) = self.ws.take() {
            ws.set_onopen(None);
            ws.set_onmessage(None);
            ws.set_onclose(None);
            ws.set_onerror(None);
            let _ = ws.close();
        }
        self.events.borrow_mut().clear();
        self._on_open = None;
        self._on_message = None;
        self._on_close = None;
        self._on_error = None;
    }
}

impl Drop for WasmSocket {
    fn drop(&mut self) {
        self.close();
    }
}
