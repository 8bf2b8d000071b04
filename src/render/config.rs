use ash::vk;

const UNORM_FORMATS: [vk::Format; 2] = [vk::Format::B8G8R8A8_UNORM, vk::Format::R8G8B8A8_UNORM];

/// Frames arrive gamma-encoded already, so a UNORM target passes them through
/// untouched. An sRGB target would encode them twice.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    UNORM_FORMATS
        .iter()
        .find_map(|wanted| {
            formats.iter().copied().find(|format| {
                format.format == *wanted
                    && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
        })
        .or_else(|| formats.first().copied())
        .unwrap_or(vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        })
}

/// FIFO is always offered and paces frames to the display.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|mode| *mode == vk::PresentModeKHR::FIFO)
        .or_else(|| modes.first().copied())
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The surface dictates its extent unless it reports the `u32::MAX` wildcard,
/// in which case the window size is fitted into the supported range.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_size: (u32, u32),
) -> vk::Extent2D {
    let current = capabilities.current_extent;
    if current.width != u32::MAX {
        return current;
    }
    let (lo, hi) = (capabilities.min_image_extent, capabilities.max_image_extent);
    vk::Extent2D {
        width: window_size.0.max(lo.width).min(hi.width),
        height: window_size.1.max(lo.height).min(hi.height),
    }
}

/// One image more than the minimum so acquire rarely blocks; zero max means
/// unbounded.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = capabilities.min_image_count + 1;
    match capabilities.max_image_count {
        0 => wanted,
        max => wanted.min(max),
    }
}
