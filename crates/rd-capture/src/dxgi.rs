//! Windows Desktop Duplication screen capture (`IDXGIOutputDuplication`).

use std::sync::Arc;

use rd_core::{CaptureConfig, CaptureError, CaptureResult, ScreenInfo};

use crate::{CaptureEngine, UnsupportedEngine};

#[cfg(target_os = "windows")]
pub(crate) fn engine() -> Option<Arc<dyn CaptureEngine>> {
    Some(windows_impl::DxgiEngine::new())
}

#[cfg(not(target_os = "windows"))]
pub(crate) fn engine() -> Option<Arc<dyn CaptureEngine>> {
    Some(UnsupportedEngine::new("DesktopDuplication"))
}

#[cfg(target_os = "windows")]
mod windows_impl {
    use super::*;

    use bytes::Bytes;
    use parking_lot::{Mutex, RwLock};
    use tracing::warn;
    use windows::Win32::Graphics::Direct3D::{
        D3D_DRIVER_TYPE_HARDWARE, D3D_FEATURE_LEVEL_10_0, D3D_FEATURE_LEVEL_10_1,
        D3D_FEATURE_LEVEL_11_0, D3D_FEATURE_LEVEL_11_1,
    };
    use windows::Win32::Graphics::Direct3D11::{
        D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D,
        D3D11_BIND_FLAG, D3D11_CPU_ACCESS_READ, D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_MAP_READ,
        D3D11_RESOURCE_MISC_FLAG, D3D11_SDK_VERSION, D3D11_TEXTURE2D_DESC, D3D11_USAGE_STAGING,
    };
    use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC};
    use windows::Win32::Graphics::Dxgi::{
        IDXGIAdapter, IDXGIDevice, IDXGIOutput, IDXGIOutput1, IDXGIOutputDuplication,
        DXGI_ERROR_ACCESS_LOST, DXGI_ERROR_NOT_CURRENTLY_AVAILABLE, DXGI_ERROR_WAIT_TIMEOUT,
    };

    use rd_core::{Frame, VideoMeta};

    use crate::worker::WorkerHandle;
    use crate::FrameCallback;

    pub(crate) struct DxgiEngine {
        config: RwLock<Option<CaptureConfig>>,
        callback: Arc<RwLock<Option<FrameCallback>>>,
        worker: Mutex<Option<WorkerHandle>>,
    }

    impl DxgiEngine {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self {
                config: RwLock::new(None),
                callback: Arc::new(RwLock::new(None)),
                worker: Mutex::new(None),
            })
        }
    }

    impl CaptureEngine for DxgiEngine {
        fn initialize(&self, config: CaptureConfig) -> CaptureResult {
            if self.worker.lock().is_some() {
                return Err(CaptureError::AlreadyStarted);
            }
            if !config.is_valid() {
                return Err(CaptureError::InvalidConfig);
            }
            // Fail loudly here rather than on the first worker tick.
            DxgiDuplicator::open(&config)?;
            *self.config.write() = Some(config);
            Ok(())
        }

        fn start(&self) -> CaptureResult {
            let mut worker_guard = self.worker.lock();
            if worker_guard.is_some() {
                return Ok(());
            }
            let config = self.config.read().clone().ok_or(CaptureError::InvalidConfig)?;
            let callback = self.callback.clone();
            let frame_rate = config.frame_rate;

            let mut duplicator: Option<DxgiDuplicator> = None;
            *worker_guard = Some(WorkerHandle::spawn(frame_rate, move || {
                capture_tick(&mut duplicator, &config, &callback)
            }));
            Ok(())
        }

        fn stop(&self) {
            if let Some(mut worker) = self.worker.lock().take() {
                worker.stop();
            }
        }

        fn is_running(&self) -> bool {
            self.worker.lock().as_ref().map(WorkerHandle::is_running).unwrap_or(false)
        }

        fn available_screens(&self) -> Vec<ScreenInfo> {
            enumerate_monitors().unwrap_or_default()
        }

        fn set_frame_callback(&self, callback: FrameCallback) {
            *self.callback.write() = Some(callback);
        }

        fn update_config(&self, config: CaptureConfig) -> CaptureResult {
            let was_running = self.is_running();
            self.stop();
            *self.config.write() = None;
            self.initialize(config)?;
            if was_running {
                self.start()?;
            }
            Ok(())
        }
    }

    fn capture_tick(
        duplicator: &mut Option<DxgiDuplicator>,
        config: &CaptureConfig,
        callback: &Arc<RwLock<Option<FrameCallback>>>,
    ) -> bool {
        if duplicator.is_none() {
            match DxgiDuplicator::open(config) {
                Ok(d) => *duplicator = Some(d),
                Err(e) => {
                    warn!("dxgi capture: failed to (re)build duplication handle: {e}");
                    return false;
                }
            }
        }

        let dup = duplicator.as_mut().expect("just populated");
        match dup.acquire_and_copy(config) {
            Ok(Some(frame)) => {
                if let Some(cb) = callback.read().as_ref() {
                    cb(frame);
                }
                true
            }
            // Timeout / no new frame this tick — not an error.
            Ok(None) => true,
            Err(CaptureError::AccessDenied) => {
                warn!("dxgi capture: access lost (session switch?), rebuilding duplication handle");
                *duplicator = None;
                false
            }
            Err(e) => {
                warn!("dxgi capture: frame acquisition failed: {e}");
                false
            }
        }
    }

    /// Owns the D3D11 device/context and the output duplication handle for
    /// one monitor.
    struct DxgiDuplicator {
        device: ID3D11Device,
        context: ID3D11DeviceContext,
        duplication: IDXGIOutputDuplication,
        width: u32,
        height: u32,
    }

    impl DxgiDuplicator {
        fn open(config: &CaptureConfig) -> Result<Self, CaptureError> {
            let feature_levels =
                [D3D_FEATURE_LEVEL_11_1, D3D_FEATURE_LEVEL_11_0, D3D_FEATURE_LEVEL_10_1, D3D_FEATURE_LEVEL_10_0];

            let mut device: Option<ID3D11Device> = None;
            let mut context: Option<ID3D11DeviceContext> = None;
            unsafe {
                D3D11CreateDevice(
                    None,
                    D3D_DRIVER_TYPE_HARDWARE,
                    None,
                    D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                    Some(&feature_levels),
                    D3D11_SDK_VERSION,
                    Some(&mut device),
                    None,
                    Some(&mut context),
                )
                .map_err(|_| CaptureError::Initialization)?;
            }
            let device = device.ok_or(CaptureError::Initialization)?;
            let context = context.ok_or(CaptureError::Initialization)?;

            let dxgi_device: IDXGIDevice = device.cast().map_err(|_| CaptureError::Initialization)?;
            let adapter: IDXGIAdapter = unsafe { dxgi_device.GetAdapter() }.map_err(|_| CaptureError::Initialization)?;
            let output: IDXGIOutput = unsafe { adapter.EnumOutputs(config.monitor_index as u32) }
                .map_err(|_| CaptureError::NoDisplay)?;
            let output1: IDXGIOutput1 = output.cast().map_err(|_| CaptureError::Initialization)?;

            let duplication = unsafe { output1.DuplicateOutput(&device) }.map_err(|_| CaptureError::AccessDenied)?;

            let desc = unsafe { output.GetDesc() }.map_err(|_| CaptureError::Initialization)?;
            let width = (desc.DesktopCoordinates.right - desc.DesktopCoordinates.left).max(0) as u32;
            let height = (desc.DesktopCoordinates.bottom - desc.DesktopCoordinates.top).max(0) as u32;

            Ok(Self { device, context, duplication, width, height })
        }

        /// Returns `Ok(None)` on a harmless timeout / stale-present tick.
        fn acquire_and_copy(&mut self, config: &CaptureConfig) -> Result<Option<Arc<Frame>>, CaptureError> {
            let mut frame_info = Default::default();
            let mut resource = None;
            let acquire = unsafe { self.duplication.AcquireNextFrame(1000, &mut frame_info, &mut resource) };
            if let Err(e) = acquire {
                return match e.code() {
                    DXGI_ERROR_WAIT_TIMEOUT => Ok(None),
                    DXGI_ERROR_ACCESS_LOST | DXGI_ERROR_NOT_CURRENTLY_AVAILABLE => Err(CaptureError::AccessDenied),
                    _ => Err(CaptureError::Unknown),
                };
            }
            let resource = resource.ok_or(CaptureError::Unknown)?;

            if frame_info.LastPresentTime == 0 {
                unsafe { let _ = self.duplication.ReleaseFrame(); }
                return Ok(None);
            }

            let texture: ID3D11Texture2D = resource.cast().map_err(|_| CaptureError::Unknown)?;
            let staging = self.create_staging_texture()?;
            unsafe { self.context.CopyResource(&staging, &texture) };

            let mapped = unsafe { self.context.Map(&staging, 0, D3D11_MAP_READ, 0) }.map_err(|_| CaptureError::Unknown)?;
            let row_pitch = mapped.RowPitch as usize;
            let row_bytes = self.width as usize * 4;

            let mut data = Vec::with_capacity(row_bytes * self.height as usize);
            if row_pitch == row_bytes {
                let total = row_bytes * self.height as usize;
                let src = unsafe { std::slice::from_raw_parts(mapped.pData as *const u8, total) };
                data.extend_from_slice(src);
            } else {
                for row in 0..self.height as usize {
                    let src = unsafe {
                        std::slice::from_raw_parts((mapped.pData as *const u8).add(row * row_pitch), row_bytes)
                    };
                    data.extend_from_slice(src);
                }
            }
            unsafe { self.context.Unmap(&staging, 0) };
            unsafe { let _ = self.duplication.ReleaseFrame(); }

            let frame = Frame::new_video(
                Bytes::from(data),
                rd_core::PixelFormat::Bgra32,
                rd_core::clock::now_micros(),
                VideoMeta {
                    width: self.width,
                    height: self.height,
                    framerate: config.frame_rate,
                    is_keyframe: false,
                    stride: Some(row_bytes as u32),
                },
            );
            Ok(Some(frame))
        }

        fn create_staging_texture(&self) -> Result<ID3D11Texture2D, CaptureError> {
            let desc = D3D11_TEXTURE2D_DESC {
                Width: self.width,
                Height: self.height,
                MipLevels: 1,
                ArraySize: 1,
                Format: DXGI_FORMAT_B8G8R8A8_UNORM,
                SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
                Usage: D3D11_USAGE_STAGING,
                BindFlags: D3D11_BIND_FLAG(0),
                CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
                MiscFlags: D3D11_RESOURCE_MISC_FLAG(0),
            };
            let mut texture: Option<ID3D11Texture2D> = None;
            unsafe { self.device.CreateTexture2D(&desc, None, Some(&mut texture)) }
                .map_err(|_| CaptureError::Unknown)?;
            texture.ok_or(CaptureError::Unknown)
        }
    }

    fn enumerate_monitors() -> Result<Vec<ScreenInfo>, CaptureError> {
        use windows::Win32::Foundation::{BOOL, LPARAM, RECT};
        use windows::Win32::Graphics::Gdi::{EnumDisplayMonitors, HDC, HMONITOR};

        let mut handles: Vec<HMONITOR> = Vec::new();

        unsafe extern "system" fn callback(hmon: HMONITOR, _: HDC, _: *mut RECT, data: LPARAM) -> BOOL {
            let list = data.0 as *mut Vec<HMONITOR>;
            unsafe { (*list).push(hmon) };
            BOOL(1)
        }

        unsafe {
            let _ = EnumDisplayMonitors(HDC::default(), None, Some(callback), LPARAM(&mut handles as *mut _ as isize));
        }

        Ok(handles
            .into_iter()
            .enumerate()
            .map(|(idx, _handle)| ScreenInfo {
                id: idx as u32,
                width: 0,
                height: 0,
                bits_per_pixel: 32,
                x: 0,
                y: 0,
                name: format!("Display {idx}"),
                is_primary: idx == 0,
            })
            .collect())
    }
}
