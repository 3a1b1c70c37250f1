// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation, optionally with validation layers + debug messenger
// - Window surface creation
// - Physical device selection (first device that satisfies every requirement)
// - Logical device + graphics/present queue creation

use super::error::{RendererError, Result};
use ash::extensions::{
    ext::DebugUtils,
    khr::{Surface, Swapchain},
};
use ash::{vk, Entry};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::collections::BTreeSet;
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Device extensions every candidate GPU must expose
fn required_device_extensions() -> [&'static CStr; 1] {
    [Swapchain::name()]
}

/// Instance-level objects: everything created before a GPU is picked.
///
/// Dropped after the logical device, in reverse creation order:
/// debug messenger, surface, instance.
pub struct InstanceContext {
    pub surface: vk::SurfaceKHR,
    pub surface_loader: Surface,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    pub instance: ash::Instance,
    entry: Entry,
}

impl InstanceContext {
    pub fn new(
        app_name: &str,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        enable_validation: bool,
    ) -> Result<Self> {
        let entry = unsafe { Entry::load() }?;

        let instance = create_instance(&entry, app_name, display_handle, enable_validation)?;

        // From here on the instance is owned by `context`, so any later
        // failure still tears it down.
        let mut context = Self {
            surface: vk::SurfaceKHR::null(),
            surface_loader: Surface::new(&entry, &instance),
            debug_utils: None,
            instance,
            entry,
        };

        if enable_validation {
            context.debug_utils = Some(setup_debug_messenger(&context.entry, &context.instance)?);
        }

        context.surface = unsafe {
            ash_window::create_surface(
                &context.entry,
                &context.instance,
                display_handle,
                window_handle,
                None,
            )
        }
        .map_err(RendererError::SurfaceCreation)?;

        Ok(context)
    }
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub queue_families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub swapchain_loader: Swapchain,
    pub name: String,
    // Declared last: dropped after the logical device is destroyed
    pub context: InstanceContext,
}

impl VulkanDevice {
    /// Create the instance, surface and logical device for a window
    ///
    /// # Arguments
    /// * `app_name` - Application name reported to the driver
    /// * `enable_validation` - Enable Vulkan validation layers (debug only)
    pub fn new(
        app_name: &str,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        enable_validation: bool,
    ) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        let context = InstanceContext::new(app_name, display_handle, window_handle, enable_validation)?;

        let selected = select_device(&context.instance, &context.surface_loader, context.surface)?;

        let (device, graphics_queue, present_queue) =
            create_logical_device(&context.instance, selected.physical_device, selected.queue_families)?;

        let swapchain_loader = Swapchain::new(&context.instance, &device);

        log::info!(
            "Queue families: graphics={}, present={}",
            selected.queue_families.graphics,
            selected.queue_families.present
        );

        Ok(Arc::new(Self {
            device,
            physical_device: selected.physical_device,
            queue_families: selected.queue_families,
            graphics_queue,
            present_queue,
            swapchain_loader,
            name: selected.name,
            context,
        }))
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.map_err(RendererError::FenceWait)
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        if let Err(e) = self.wait_idle() {
            log::error!("Device wait failed before destruction: {}", e);
        }

        unsafe {
            self.device.destroy_device(None);
        }
    }
}

// =============================================================================
// INSTANCE
// =============================================================================

fn create_instance(
    entry: &Entry,
    app_name: &str,
    display_handle: RawDisplayHandle,
    enable_validation: bool,
) -> Result<ash::Instance> {
    let app_name_cstr = CString::new(app_name).unwrap_or_default();
    let engine_name = c"No Engine";

    let version = vk::make_api_version(
        0,
        env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
        env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
        env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0),
    );

    let app_info = vk::ApplicationInfo::builder()
        .application_name(&app_name_cstr)
        .application_version(version)
        .engine_name(engine_name)
        .engine_version(vk::make_api_version(0, 1, 0, 0))
        .api_version(vk::API_VERSION_1_0);

    // Platform surface extensions, as the window system needs them
    let mut extensions: Vec<*const c_char> = ash_window::enumerate_required_extensions(display_handle)
        .map_err(RendererError::InstanceCreation)?
        .to_vec();

    let available = entry
        .enumerate_instance_extension_properties(None)
        .map_err(RendererError::InstanceCreation)?;
    let available_names: Vec<&CStr> = available
        .iter()
        .map(|props| unsafe { CStr::from_ptr(props.extension_name.as_ptr()) })
        .collect();

    let surface_extensions: Vec<&CStr> = extensions
        .iter()
        .map(|&name| unsafe { CStr::from_ptr(name) })
        .collect();
    if let Some(missing) = missing_names(&surface_extensions, &available_names).into_iter().next() {
        log::error!("Missing requested instance extension: {}", missing);
        return Err(RendererError::MissingExtension(missing));
    }

    let mut layers: Vec<*const c_char> = Vec::new();
    if enable_validation {
        check_validation_support(entry, &available_names)
            .map_err(|e| RendererError::ValidationUnavailable(Box::new(e)))?;
        extensions.push(DebugUtils::name().as_ptr());
        layers.push(VALIDATION_LAYER.as_ptr());
    }

    log::debug!("Instance extensions enabled:");
    for &name in &extensions {
        log::debug!("    {}", unsafe { CStr::from_ptr(name) }.to_string_lossy());
    }
    if enable_validation {
        log::debug!("Validation layers enabled:");
        log::debug!("    {}", VALIDATION_LAYER.to_string_lossy());
    }

    let create_info = vk::InstanceCreateInfo::builder()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layers);

    unsafe { entry.create_instance(&create_info, None) }.map_err(RendererError::InstanceCreation)
}

/// Both the debug-utils extension and the Khronos validation layer must be present
fn check_validation_support(entry: &Entry, available_extensions: &[&CStr]) -> Result<()> {
    if let Some(missing) = missing_names(&[DebugUtils::name()], available_extensions).into_iter().next() {
        log::error!("Missing requested instance extension: {}", missing);
        return Err(RendererError::MissingExtension(missing));
    }

    let layers = entry
        .enumerate_instance_layer_properties()
        .map_err(RendererError::InstanceCreation)?;
    let layer_names: Vec<&CStr> = layers
        .iter()
        .map(|props| unsafe { CStr::from_ptr(props.layer_name.as_ptr()) })
        .collect();

    if let Some(missing) = missing_names(&[VALIDATION_LAYER], &layer_names).into_iter().next() {
        log::error!("Missing requested validation layer: {}", missing);
        return Err(RendererError::MissingLayer(missing));
    }

    Ok(())
}

/// Names in `required` that do not appear in `available`, in order
pub fn missing_names(required: &[&CStr], available: &[&CStr]) -> Vec<String> {
    required
        .iter()
        .filter(|name| !available.contains(name))
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

fn setup_debug_messenger(
    entry: &Entry,
    instance: &ash::Instance,
) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
    let debug_utils = DebugUtils::new(entry, instance);

    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
        .map_err(RendererError::InstanceCreation)?;

    Ok((debug_utils, messenger))
}

fn message_type_label(message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "Validation"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "Performance"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::GENERAL) {
        "General"
    } else {
        "Other"
    }
}

/// Loader and layer info chatter stays below the default `info` level
fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::Level::Error,
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::Level::Warn,
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::Level::Debug,
        _ => log::Level::Trace,
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message).to_string_lossy();
    let label = message_type_label(message_type);

    log::log!(severity_level(message_severity), "[{}] {}", label, message);

    vk::FALSE
}

// =============================================================================
// CAPABILITY RESOLVER
// =============================================================================

/// Queue family indices discovered on one physical device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Scan families in order, stopping once both roles are filled.
    pub fn find<F>(families: &[vk::QueueFamilyProperties], mut supports_present: F) -> Self
    where
        F: FnMut(u32) -> bool,
    {
        let mut indices = Self::default();

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;

            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                indices.graphics = Some(index);
            }
            if supports_present(index) {
                indices.present = Some(index);
            }
            if indices.is_complete() {
                break;
            }
        }

        indices
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    pub fn complete(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
        })
    }
}

/// Graphics and present families of the chosen device (may be equal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, one queue is created per entry
    pub fn unique(&self) -> Vec<u32> {
        BTreeSet::from([self.graphics, self.present]).into_iter().collect()
    }
}

/// Everything the resolver needs to know about one enumerated device
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    pub name: String,
    pub queue_families: QueueFamilyIndices,
    pub missing_extensions: Vec<String>,
    pub format_count: usize,
    pub present_mode_count: usize,
}

impl DeviceCandidate {
    pub fn is_suitable(&self) -> bool {
        self.queue_families.is_complete()
            && self.missing_extensions.is_empty()
            && self.format_count > 0
            && self.present_mode_count > 0
    }
}

/// First-fit: the first suitable candidate in enumeration order wins.
pub fn first_suitable(candidates: &[DeviceCandidate]) -> Result<usize> {
    candidates
        .iter()
        .position(DeviceCandidate::is_suitable)
        .ok_or(RendererError::NoSuitableDevice)
}

pub struct SelectedDevice {
    pub physical_device: vk::PhysicalDevice,
    pub queue_families: QueueFamilies,
    pub name: String,
}

fn inspect_device(
    instance: &ash::Instance,
    surface_loader: &Surface,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
) -> DeviceCandidate {
    let props = unsafe { instance.get_physical_device_properties(physical_device) };
    let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
        .to_string_lossy()
        .into_owned();

    let families = unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    let queue_families = QueueFamilyIndices::find(&families, |index| unsafe {
        surface_loader
            .get_physical_device_surface_support(physical_device, index, surface)
            .unwrap_or(false)
    });

    let available = unsafe { instance.enumerate_device_extension_properties(physical_device) }
        .unwrap_or_default();
    let available_names: Vec<&CStr> = available
        .iter()
        .map(|props| unsafe { CStr::from_ptr(props.extension_name.as_ptr()) })
        .collect();
    let missing_extensions = missing_names(&required_device_extensions(), &available_names);

    // Surface support is only meaningful once the swapchain extension exists
    let (format_count, present_mode_count) = if missing_extensions.is_empty() {
        unsafe {
            (
                surface_loader
                    .get_physical_device_surface_formats(physical_device, surface)
                    .map(|formats| formats.len())
                    .unwrap_or(0),
                surface_loader
                    .get_physical_device_surface_present_modes(physical_device, surface)
                    .map(|modes| modes.len())
                    .unwrap_or(0),
            )
        }
    } else {
        (0, 0)
    };

    DeviceCandidate {
        name,
        queue_families,
        missing_extensions,
        format_count,
        present_mode_count,
    }
}

/// Pick the first enumerated GPU that can draw and present to `surface`.
pub fn select_device(
    instance: &ash::Instance,
    surface_loader: &Surface,
    surface: vk::SurfaceKHR,
) -> Result<SelectedDevice> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .map_err(|_| RendererError::DeviceEnumeration)?;

    if devices.is_empty() {
        return Err(RendererError::DeviceEnumeration);
    }

    let candidates: Vec<DeviceCandidate> = devices
        .iter()
        .map(|&device| inspect_device(instance, surface_loader, surface, device))
        .collect();

    let selected = first_suitable(&candidates);

    log::info!("Devices found:");
    for (index, candidate) in candidates.iter().enumerate() {
        let marker = if matches!(selected, Ok(chosen) if chosen == index) {
            " (selected)"
        } else {
            ""
        };
        log::info!("    {}{}", candidate.name, marker);
        if !candidate.is_suitable() {
            log::debug!(
                "    rejected: queues={:?}, missing extensions={:?}, formats={}, present modes={}",
                candidate.queue_families,
                candidate.missing_extensions,
                candidate.format_count,
                candidate.present_mode_count
            );
        }
    }

    let index = selected?;
    let candidate = &candidates[index];
    let queue_families = candidate
        .queue_families
        .complete()
        .ok_or(RendererError::NoSuitableDevice)?;

    Ok(SelectedDevice {
        physical_device: devices[index],
        queue_families,
        name: candidate.name.clone(),
    })
}

fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_families: QueueFamilies,
) -> Result<(ash::Device, vk::Queue, vk::Queue)> {
    let queue_priorities = [1.0];
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(family)
                .queue_priorities(&queue_priorities)
                .build()
        })
        .collect();

    let extensions: Vec<*const c_char> = required_device_extensions()
        .iter()
        .map(|name| name.as_ptr())
        .collect();

    let features = vk::PhysicalDeviceFeatures::default();

    let create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extensions)
        .enabled_features(&features);

    let device = unsafe { instance.create_device(physical_device, &create_info, None) }
        .map_err(RendererError::DeviceCreation)?;

    log::debug!("Device extensions enabled:");
    for name in required_device_extensions() {
        log::debug!("    {}", name.to_string_lossy());
    }

    let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
    let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

    Ok((device, graphics_queue, present_queue))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn suitable(name: &str) -> DeviceCandidate {
        DeviceCandidate {
            name: name.to_string(),
            queue_families: QueueFamilyIndices {
                graphics: Some(0),
                present: Some(0),
            },
            missing_extensions: Vec::new(),
            format_count: 2,
            present_mode_count: 1,
        }
    }

    #[test]
    fn finds_single_family_for_both_roles() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        let indices = QueueFamilyIndices::find(&families, |_| true);

        let complete = indices.complete().unwrap();
        assert_eq!(complete, QueueFamilies { graphics: 0, present: 0 });
        assert!(complete.is_shared());
        assert_eq!(complete.unique(), vec![0]);
    }

    #[test]
    fn finds_split_graphics_and_present_families() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
        ];
        let indices = QueueFamilyIndices::find(&families, |index| index == 1);

        let complete = indices.complete().unwrap();
        assert_eq!(complete, QueueFamilies { graphics: 0, present: 1 });
        assert!(!complete.is_shared());
        assert_eq!(complete.unique(), vec![0, 1]);
    }

    #[test]
    fn scan_stops_once_both_roles_are_known() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let mut probed = Vec::new();
        let indices = QueueFamilyIndices::find(&families, |index| {
            probed.push(index);
            index >= 1
        });

        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, Some(1));
        assert_eq!(probed, vec![0, 1]);
    }

    #[test]
    fn no_present_support_is_incomplete() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = QueueFamilyIndices::find(&families, |_| false);
        assert!(!indices.is_complete());
        assert!(indices.complete().is_none());
    }

    #[test]
    fn first_fit_ignores_later_devices() {
        let candidates = [suitable("integrated"), suitable("discrete")];
        assert_eq!(first_suitable(&candidates).unwrap(), 0);
    }

    #[test]
    fn skips_devices_without_formats_or_present_modes() {
        let mut no_formats = suitable("no formats");
        no_formats.format_count = 0;
        let mut no_modes = suitable("no modes");
        no_modes.present_mode_count = 0;

        let candidates = [no_formats, no_modes, suitable("good")];
        assert_eq!(first_suitable(&candidates).unwrap(), 2);
    }

    #[test]
    fn missing_swapchain_extension_everywhere_is_no_suitable_device() {
        let candidates: Vec<DeviceCandidate> = ["a", "b"]
            .iter()
            .map(|name| DeviceCandidate {
                missing_extensions: missing_names(&required_device_extensions(), &[]),
                format_count: 0,
                present_mode_count: 0,
                ..suitable(name)
            })
            .collect();

        assert_eq!(candidates[0].missing_extensions, vec!["VK_KHR_swapchain".to_string()]);
        assert!(matches!(
            first_suitable(&candidates),
            Err(RendererError::NoSuitableDevice)
        ));
    }

    #[test]
    fn missing_names_reports_only_absent_entries() {
        let required = [c"VK_KHR_surface", c"VK_KHR_xcb_surface"];
        let available = [c"VK_KHR_surface", c"VK_EXT_debug_utils"];
        assert_eq!(missing_names(&required, &available), vec!["VK_KHR_xcb_surface".to_string()]);
        assert!(missing_names(&required[..1], &available).is_empty());
    }

    #[test]
    fn message_types_are_labelled() {
        assert_eq!(message_type_label(vk::DebugUtilsMessageTypeFlagsEXT::GENERAL), "General");
        assert_eq!(message_type_label(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION), "Validation");
        assert_eq!(message_type_label(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE), "Performance");
    }

    #[test]
    fn info_messages_stay_below_default_level() {
        type Severity = vk::DebugUtilsMessageSeverityFlagsEXT;

        assert_eq!(severity_level(Severity::ERROR), log::Level::Error);
        assert_eq!(severity_level(Severity::WARNING), log::Level::Warn);
        assert_eq!(severity_level(Severity::INFO), log::Level::Debug);
        assert_eq!(severity_level(Severity::VERBOSE), log::Level::Trace);
        assert!(severity_level(Severity::INFO) > log::LevelFilter::Info);
    }
}
