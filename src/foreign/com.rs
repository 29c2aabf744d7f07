//! Automation binding against a running PowerPoint-compatible application.
//!
//! All late-bound property and method lookups live in [`Dispatch`]; the
//! capability types below only name the members they need.

use super::probe::ObjectDirectory;
use super::{
    AppFamily, EventSubscription, ForeignError, ForeignEvent, ForeignResult, Presentation,
    PresentationApp, SlideShowView, SlideShowWindow, SlideShowWindows,
};
use std::sync::mpsc::Sender;
use windows::core::{Interface, IUnknown, BSTR, GUID, HSTRING, PCWSTR, VARIANT};
use windows::Win32::Foundation::{E_NOTIMPL, HWND};
use windows::Win32::System::Com::{
    CLSIDFromProgID, CoInitializeEx, CoTaskMemFree, CoUninitialize, CreateBindCtx,
    GetRunningObjectTable, IConnectionPoint, IConnectionPointContainer, IDispatch,
    IDispatch_Impl, IDispatch_Vtbl, IMoniker, ITypeInfo, COINIT_MULTITHREADED, DISPATCH_FLAGS,
    DISPATCH_METHOD, DISPATCH_PROPERTYGET, DISPPARAMS, EXCEPINFO,
};
use windows::Win32::System::Ole::GetActiveObject;
use windows::Win32::UI::WindowsAndMessaging::{GetForegroundWindow, GetWindowThreadProcessId};

const LOCALE_USER_DEFAULT: u32 = 0x0400;

/// Registered automation identifiers and the family each belongs to.
pub const PROG_IDS: &[(&str, AppFamily)] = &[
    ("PowerPoint.Application", AppFamily::PowerPoint),
    ("Kwpp.Application", AppFamily::Compatible),
    ("WPP.Application", AppFamily::Compatible),
];

struct Apartment(bool);

impl Apartment {
    fn enter() -> Self {
        Self(unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) }.is_ok())
    }
}

impl Drop for Apartment {
    fn drop(&mut self) {
        if self.0 {
            unsafe { CoUninitialize() };
        }
    }
}

thread_local! {
    static APARTMENT: Apartment = Apartment::enter();
}

fn ensure_apartment() {
    APARTMENT.with(|_| {});
}

fn map_error(err: windows::core::Error, what: &str) -> ForeignError {
    ForeignError::from_hresult(err.code().0, format!("{what}: {}", err.message()))
}

/// Late-bound automation object.
#[derive(Clone)]
struct Dispatch(IDispatch);

// Objects are obtained in the multithreaded apartment and may be called from
// any thread joined to it.
unsafe impl Send for Dispatch {}

impl Dispatch {
    fn from_variant(value: &VARIANT, what: &str) -> ForeignResult<Self> {
        let unknown = windows::core::IUnknown::try_from(value).map_err(|e| map_error(e, what))?;
        unknown
            .cast::<IDispatch>()
            .map(Dispatch)
            .map_err(|e| map_error(e, what))
    }

    fn dispid(&self, name: &str) -> ForeignResult<i32> {
        let wide = HSTRING::from(name);
        let names = [PCWSTR(wide.as_ptr())];
        let mut id = 0i32;
        unsafe {
            self.0
                .GetIDsOfNames(&GUID::zeroed(), names.as_ptr(), 1, LOCALE_USER_DEFAULT, &mut id)
        }
        .map_err(|e| map_error(e, name))?;
        Ok(id)
    }

    fn has_member(&self, name: &str) -> bool {
        self.dispid(name).is_ok()
    }

    fn invoke(&self, name: &str, flags: DISPATCH_FLAGS, mut args: Vec<VARIANT>) -> ForeignResult<VARIANT> {
        let id = self.dispid(name)?;
        args.reverse();
        let params = DISPPARAMS {
            rgvarg: args.as_mut_ptr(),
            rgdispidNamedArgs: std::ptr::null_mut(),
            cArgs: args.len() as u32,
            cNamedArgs: 0,
        };
        let mut result = VARIANT::default();
        unsafe {
            self.0.Invoke(
                id,
                &GUID::zeroed(),
                LOCALE_USER_DEFAULT,
                flags,
                &params,
                Some(&mut result as *mut VARIANT),
                None,
                None,
            )
        }
        .map_err(|e| map_error(e, name))?;
        Ok(result)
    }

    fn get(&self, name: &str) -> ForeignResult<VARIANT> {
        self.invoke(name, DISPATCH_PROPERTYGET, Vec::new())
    }

    fn get_object(&self, name: &str) -> ForeignResult<Dispatch> {
        Self::from_variant(&self.get(name)?, name)
    }

    fn get_i32(&self, name: &str) -> ForeignResult<i32> {
        i32::try_from(&self.get(name)?).map_err(|e| map_error(e, name))
    }

    fn get_string(&self, name: &str) -> ForeignResult<String> {
        BSTR::try_from(&self.get(name)?)
            .map(|value| value.to_string())
            .map_err(|e| map_error(e, name))
    }

    fn item(&self, index: i32) -> ForeignResult<Dispatch> {
        let value = self.invoke(
            "Item",
            DISPATCH_METHOD | DISPATCH_PROPERTYGET,
            vec![VARIANT::from(index)],
        )?;
        Self::from_variant(&value, "Item")
    }

    fn call(&self, name: &str, args: Vec<VARIANT>) -> ForeignResult<()> {
        self.invoke(name, DISPATCH_METHOD, args).map(|_| ())
    }
}

fn window_pid(hwnd: i32) -> Option<u32> {
    if hwnd == 0 {
        return None;
    }
    let mut pid = 0u32;
    unsafe { GetWindowThreadProcessId(HWND(hwnd as isize as _), Some(&mut pid)) };
    (pid != 0).then_some(pid)
}

fn family_from_name(name: &str) -> AppFamily {
    if name.contains("PowerPoint") {
        AppFamily::PowerPoint
    } else {
        AppFamily::Compatible
    }
}

pub struct ComApp {
    root: Dispatch,
    family: AppFamily,
    pid: Option<u32>,
}

impl ComApp {
    fn new(root: Dispatch, family: AppFamily) -> Self {
        let pid = root.get_i32("HWND").ok().and_then(window_pid);
        Self { root, family, pid }
    }
}

impl PresentationApp for ComApp {
    fn family(&self) -> AppFamily {
        self.family
    }

    fn process_id(&self) -> Option<u32> {
        self.pid
    }

    fn ping(&self) -> ForeignResult<()> {
        self.root.get_string("Name").map(|_| ())
    }

    fn active_presentation(&self) -> ForeignResult<Option<Box<dyn Presentation>>> {
        let presentations = self.root.get_object("Presentations")?;
        if presentations.get_i32("Count")? <= 0 {
            return Ok(None);
        }
        drop(presentations);
        let active = self.root.get_object("ActivePresentation")?;
        Ok(Some(Box::new(ComPresentation(active))))
    }

    fn slide_show_windows(&self) -> ForeignResult<Box<dyn SlideShowWindows>> {
        Ok(Box::new(ComSlideShowWindows(self.root.get_object("SlideShowWindows")?)))
    }

    fn is_slide_show_foreground(&self) -> ForeignResult<bool> {
        let windows = self.root.get_object("SlideShowWindows")?;
        if windows.get_i32("Count")? <= 0 {
            return Ok(false);
        }
        let window = windows.item(1)?;
        let hwnd = window.get_i32("HWND")?;
        let foreground = unsafe { GetForegroundWindow() };
        Ok(foreground.0 as isize == hwnd as isize)
    }

    /// Advise an application event sink. Applications without the event
    /// connection point fail here and are observed by polling instead.
    fn subscribe(
        &self,
        sink: Sender<ForeignEvent>,
    ) -> ForeignResult<Option<Box<dyn EventSubscription>>> {
        let container = self
            .root
            .0
            .cast::<IConnectionPointContainer>()
            .map_err(|e| map_error(e, "IConnectionPointContainer"))?;
        let point = unsafe { container.FindConnectionPoint(&EApplication::IID) }
            .map_err(|e| map_error(e, "FindConnectionPoint"))?;
        let handler: IUnknown = AppEventSink { sink }.into();
        let cookie = unsafe { point.Advise(&handler) }.map_err(|e| map_error(e, "Advise"))?;
        tracing::debug!(cookie, family = ?self.family, "application event sink advised");
        Ok(Some(Box::new(ComSubscription { point, cookie })))
    }
}

/// Outgoing application event interface.
#[windows::core::interface("914934C2-5A91-11CF-8700-00AA0060263B")]
unsafe trait EApplication: IDispatch {}

const DISPID_PRESENTATION_CLOSE: i32 = 2004;
const DISPID_PRESENTATION_OPEN: i32 = 2006;
const DISPID_NEW_PRESENTATION: i32 = 2007;
const DISPID_SLIDE_SHOW_BEGIN: i32 = 2011;
const DISPID_SLIDE_SHOW_NEXT_SLIDE: i32 = 2013;
const DISPID_SLIDE_SHOW_END: i32 = 2014;

/// Lifecycle notification raised under `dispid`, if it is one we follow.
fn automation_event(dispid: i32) -> Option<ForeignEvent> {
    match dispid {
        DISPID_PRESENTATION_CLOSE => Some(ForeignEvent::PresentationClose),
        DISPID_PRESENTATION_OPEN | DISPID_NEW_PRESENTATION => Some(ForeignEvent::PresentationOpen),
        DISPID_SLIDE_SHOW_BEGIN => Some(ForeignEvent::SlideShowBegin),
        DISPID_SLIDE_SHOW_NEXT_SLIDE => Some(ForeignEvent::SlideShowNextSlide),
        DISPID_SLIDE_SHOW_END => Some(ForeignEvent::SlideShowEnd),
        _ => None,
    }
}

#[windows::core::implement(EApplication)]
struct AppEventSink {
    sink: Sender<ForeignEvent>,
}

impl EApplication_Impl for AppEventSink_Impl {}

impl IDispatch_Impl for AppEventSink_Impl {
    fn GetTypeInfoCount(&self) -> windows::core::Result<u32> {
        Ok(0)
    }

    fn GetTypeInfo(&self, _itinfo: u32, _lcid: u32) -> windows::core::Result<ITypeInfo> {
        Err(E_NOTIMPL.into())
    }

    fn GetIDsOfNames(
        &self,
        _riid: *const GUID,
        _names: *const PCWSTR,
        _count: u32,
        _lcid: u32,
        _ids: *mut i32,
    ) -> windows::core::Result<()> {
        Err(E_NOTIMPL.into())
    }

    fn Invoke(
        &self,
        dispid: i32,
        _riid: *const GUID,
        _lcid: u32,
        _flags: DISPATCH_FLAGS,
        _params: *const DISPPARAMS,
        _result: *mut VARIANT,
        _excepinfo: *mut EXCEPINFO,
        _argerr: *mut u32,
    ) -> windows::core::Result<()> {
        if let Some(event) = automation_event(dispid) {
            // The receiver is gone once the connection is torn down.
            let _ = self.sink.send(event);
        }
        Ok(())
    }
}

/// Advised sink; unadvised on drop, before the application handle goes.
struct ComSubscription {
    point: IConnectionPoint,
    cookie: u32,
}

unsafe impl Send for ComSubscription {}

impl EventSubscription for ComSubscription {}

impl Drop for ComSubscription {
    fn drop(&mut self) {
        if let Err(err) = unsafe { self.point.Unadvise(self.cookie) } {
            tracing::debug!(cookie = self.cookie, error = %err.message(), "failed to unadvise event sink");
        }
    }
}

struct ComPresentation(Dispatch);

impl Presentation for ComPresentation {
    fn name(&self) -> ForeignResult<String> {
        self.0.get_string("Name")
    }

    fn full_path(&self) -> ForeignResult<String> {
        self.0.get_string("FullName")
    }

    fn slide_count(&self) -> ForeignResult<u32> {
        let slides = self.0.get_object("Slides")?;
        Ok(slides.get_i32("Count")?.max(0) as u32)
    }

    fn start_slide_show(&self) -> ForeignResult<()> {
        let settings = self.0.get_object("SlideShowSettings")?;
        settings.call("Run", Vec::new())
    }
}

struct ComSlideShowWindows(Dispatch);

impl SlideShowWindows for ComSlideShowWindows {
    fn count(&self) -> ForeignResult<usize> {
        Ok(self.0.get_i32("Count")?.max(0) as usize)
    }

    fn item(&self, index: usize) -> ForeignResult<Box<dyn SlideShowWindow>> {
        Ok(Box::new(ComSlideShowWindow(self.0.item(index as i32)?)))
    }
}

struct ComSlideShowWindow(Dispatch);

impl SlideShowWindow for ComSlideShowWindow {
    fn view(&self) -> ForeignResult<Box<dyn SlideShowView>> {
        Ok(Box::new(ComView(self.0.get_object("View")?)))
    }
}

struct ComView(Dispatch);

impl SlideShowView for ComView {
    fn current_slide(&self) -> ForeignResult<u32> {
        Ok(self.0.get_i32("CurrentShowPosition")?.max(0) as u32)
    }

    fn goto_slide(&self, slide: u32) -> ForeignResult<()> {
        self.0.call("GotoSlide", vec![VARIANT::from(slide as i32)])
    }

    fn next(&self) -> ForeignResult<()> {
        self.0.call("Next", Vec::new())
    }

    fn previous(&self) -> ForeignResult<()> {
        self.0.call("Previous", Vec::new())
    }

    fn exit(&self) -> ForeignResult<()> {
        self.0.call("Exit", Vec::new())
    }
}

/// Registration lookup through `GetActiveObject`, scan through the running
/// object table.
#[derive(Debug, Clone)]
pub struct ComDirectory {
    prog_ids: Vec<(String, AppFamily)>,
}

impl Default for ComDirectory {
    fn default() -> Self {
        Self {
            prog_ids: PROG_IDS
                .iter()
                .map(|(id, family)| (id.to_string(), *family))
                .collect(),
        }
    }
}

impl ComDirectory {
    fn active_object(prog_id: &str) -> ForeignResult<Option<Dispatch>> {
        let wide = HSTRING::from(prog_id);
        let clsid = match unsafe { CLSIDFromProgID(PCWSTR(wide.as_ptr())) } {
            Ok(clsid) => clsid,
            // Not installed.
            Err(_) => return Ok(None),
        };
        let mut unknown = None;
        if unsafe { GetActiveObject(&clsid, None, &mut unknown) }.is_err() {
            return Ok(None);
        }
        let Some(unknown) = unknown else {
            return Ok(None);
        };
        unknown
            .cast::<IDispatch>()
            .map(|d| Some(Dispatch(d)))
            .map_err(|e| map_error(e, prog_id))
    }

    /// Resolve a running-object-table entry to its application root, if it
    /// belongs to a presentation application.
    fn application_of(object: Dispatch) -> Option<Dispatch> {
        if object.has_member("Presentations") && object.has_member("SlideShowWindows") {
            return Some(object);
        }
        if !object.has_member("Slides") {
            return None;
        }
        let app = object.get_object("Application").ok()?;
        (app.has_member("Presentations") && app.has_member("SlideShowWindows")).then_some(app)
    }

    fn display_name(moniker: &IMoniker) -> Option<String> {
        let ctx = unsafe { CreateBindCtx(0) }.ok()?;
        let raw = unsafe { moniker.GetDisplayName(&ctx, None) }.ok()?;
        let name = unsafe { raw.to_string() }.ok();
        unsafe { CoTaskMemFree(Some(raw.0 as _)) };
        name
    }
}

impl ObjectDirectory for ComDirectory {
    fn direct_lookup(&self) -> ForeignResult<Option<Box<dyn PresentationApp>>> {
        ensure_apartment();
        for (prog_id, family) in &self.prog_ids {
            if let Some(root) = Self::active_object(prog_id)? {
                return Ok(Some(Box::new(ComApp::new(root, *family))));
            }
        }
        Ok(None)
    }

    fn scan_running(&self) -> ForeignResult<Vec<Box<dyn PresentationApp>>> {
        ensure_apartment();
        let table = unsafe { GetRunningObjectTable(0) }.map_err(|e| map_error(e, "running object table"))?;
        let monikers = unsafe { table.EnumRunning() }.map_err(|e| map_error(e, "EnumRunning"))?;
        let mut found: Vec<Box<dyn PresentationApp>> = Vec::new();
        loop {
            let mut slot = [None];
            let mut fetched = 0u32;
            let hr = unsafe { monikers.Next(&mut slot, Some(&mut fetched)) };
            if hr.is_err() || fetched == 0 {
                break;
            }
            let Some(moniker) = slot[0].take() else {
                break;
            };
            let name = Self::display_name(&moniker).unwrap_or_default();
            let Ok(unknown) = (unsafe { table.GetObject(&moniker) }) else {
                continue;
            };
            let Ok(object) = unknown.cast::<IDispatch>() else {
                continue;
            };
            if let Some(root) = Self::application_of(Dispatch(object)) {
                let family = root
                    .get_string("Name")
                    .map(|n| family_from_name(&n))
                    .unwrap_or(AppFamily::Compatible);
                tracing::trace!(moniker = %name, ?family, "running presentation object");
                found.push(Box::new(ComApp::new(root, family)));
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_dispids_map_to_events() {
        assert_eq!(automation_event(2004), Some(ForeignEvent::PresentationClose));
        assert_eq!(automation_event(2006), Some(ForeignEvent::PresentationOpen));
        assert_eq!(automation_event(2007), Some(ForeignEvent::PresentationOpen));
        assert_eq!(automation_event(2011), Some(ForeignEvent::SlideShowBegin));
        assert_eq!(automation_event(2013), Some(ForeignEvent::SlideShowNextSlide));
        assert_eq!(automation_event(2014), Some(ForeignEvent::SlideShowEnd));
    }

    #[test]
    fn other_application_events_are_ignored() {
        for dispid in [2001, 2005, 2009, 2012, 0, -1] {
            assert_eq!(automation_event(dispid), None, "dispid {dispid}");
        }
    }
}
