//! Settings resolution: persisted settings plus runtime facts in,
//! a legal [`ExportSettings`] out.
//!
//! Resolution never fails. Anything unknown or contradictory falls back to
//! a default, and resolving an already-resolved value changes nothing.

use crate::settings::{
    ExportCompression, ExportDestination, ExportFormat, ExportSettings, Organization,
    RawExportSettings, ResolutionPreset,
};

/// Runtime facts that constrain export settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveContext<'a> {
    /// The project background has alpha, which MP4 cannot carry.
    pub has_transparent_background: bool,

    /// Organizations available to the signed-in user, in display order.
    pub organizations: &'a [Organization],
}

/// Normalize `raw` into a legal export configuration.
pub fn resolve(raw: &RawExportSettings, ctx: &ResolveContext<'_>) -> ExportSettings {
    let requested_format = ExportFormat::parse(&raw.format).unwrap_or(ExportFormat::Mp4);
    let mut export_to = ExportDestination::parse(&raw.export_to).unwrap_or(ExportDestination::File);

    let format = if ctx.has_transparent_background {
        // Links are MP4-only, so transparent content cannot go to a link.
        if export_to == ExportDestination::Link {
            export_to = ExportDestination::File;
        }
        ExportFormat::Gif
    } else if requested_format == ExportFormat::Gif && export_to == ExportDestination::Link {
        ExportFormat::Mp4
    } else {
        requested_format
    };

    let fps = snap_fps(raw.fps, format.fps_options());

    let mut resolution = ResolutionPreset::from_value(&raw.resolution.value)
        .or_else(|| ResolutionPreset::from_dimensions(raw.resolution.width, raw.resolution.height))
        .unwrap_or(ResolutionPreset::P720);
    if format == ExportFormat::Gif && !resolution.allowed_for_gif() {
        resolution = ResolutionPreset::P720;
    }

    let mut compression =
        ExportCompression::parse(&raw.compression).unwrap_or(ExportCompression::Maximum);
    let mut custom_bpp = None;
    if raw.advanced_mode {
        if let Some(bpp) = raw.compression_bpp.filter(|b| b.is_finite() && *b > 0.0) {
            match ExportCompression::from_bpp(bpp) {
                Some(preset) => compression = preset,
                None => custom_bpp = Some(bpp),
            }
        }
    }

    let organization_id = raw
        .organization_id
        .clone()
        .filter(|id| !id.is_empty())
        .or_else(|| ctx.organizations.first().map(|org| org.id.clone()));

    let settings = ExportSettings {
        format,
        fps,
        export_to,
        resolution,
        compression,
        custom_bpp,
        organization_id,
        force_ffmpeg_decoder: raw.force_ffmpeg_decoder,
    };

    if settings.format.as_str() != raw.format || settings.fps != raw.fps {
        tracing::debug!(
            requested_format = %raw.format,
            format = settings.format.as_str(),
            requested_fps = raw.fps,
            fps = settings.fps,
            "Export settings normalized"
        );
    }

    settings
}

/// Nearest member of `options` (ascending) to `fps`; ties go to the lower rate.
pub fn snap_fps(fps: u32, options: &[u32]) -> u32 {
    options
        .iter()
        .copied()
        .min_by_key(|option| option.abs_diff(fps))
        .unwrap_or(fps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{RawResolution, GIF_FPS_OPTIONS, MP4_FPS_OPTIONS};
    use proptest::prelude::*;

    fn raw(format: &str, export_to: &str, fps: u32) -> RawExportSettings {
        RawExportSettings {
            format: format.to_string(),
            export_to: export_to.to_string(),
            fps,
            ..RawExportSettings::default()
        }
    }

    fn orgs() -> Vec<Organization> {
        vec![
            Organization {
                id: "org-a".to_string(),
                name: "A".to_string(),
            },
            Organization {
                id: "org-b".to_string(),
                name: "B".to_string(),
            },
        ]
    }

    #[test]
    fn test_transparent_background_forces_gif() {
        let ctx = ResolveContext {
            has_transparent_background: true,
            organizations: &[],
        };
        let settings = resolve(&raw("Mp4", "file", 60), &ctx);
        assert_eq!(settings.format, ExportFormat::Gif);
        assert_eq!(settings.fps, 30);
    }

    #[test]
    fn test_link_forces_mp4() {
        let settings = resolve(&raw("Gif", "link", 20), &ResolveContext::default());
        assert_eq!(settings.format, ExportFormat::Mp4);
        assert_eq!(settings.export_to, ExportDestination::Link);
        assert_eq!(settings.fps, 15);
    }

    #[test]
    fn test_transparent_link_falls_back_to_file() {
        let ctx = ResolveContext {
            has_transparent_background: true,
            organizations: &[],
        };
        let settings = resolve(&raw("Mp4", "link", 30), &ctx);
        assert_eq!(settings.format, ExportFormat::Gif);
        assert_eq!(settings.export_to, ExportDestination::File);
    }

    #[test]
    fn test_unknown_values_fall_back() {
        let mut input = raw("Webm", "printer", 24);
        input.compression = "Ultra".to_string();
        let settings = resolve(&input, &ResolveContext::default());
        assert_eq!(settings.format, ExportFormat::Mp4);
        assert_eq!(settings.export_to, ExportDestination::File);
        assert_eq!(settings.compression, ExportCompression::Maximum);
        assert_eq!(settings.fps, 30);
    }

    #[test]
    fn test_gif_limits_resolution() {
        let mut input = raw("Gif", "file", 15);
        input.resolution = ResolutionPreset::P4k.into();
        let settings = resolve(&input, &ResolveContext::default());
        assert_eq!(settings.resolution, ResolutionPreset::P720);
    }

    #[test]
    fn test_resolution_matched_by_dimensions() {
        let mut input = raw("Mp4", "file", 30);
        input.resolution = RawResolution {
            label: "Full HD".to_string(),
            value: "fhd".to_string(),
            width: 1920,
            height: 1080,
        };
        let settings = resolve(&input, &ResolveContext::default());
        assert_eq!(settings.resolution, ResolutionPreset::P1080);
    }

    #[test]
    fn test_custom_bpp_only_in_advanced_mode() {
        let mut input = raw("Mp4", "file", 30);
        input.compression_bpp = Some(0.2);
        assert_eq!(resolve(&input, &ResolveContext::default()).custom_bpp, None);

        input.advanced_mode = true;
        assert_eq!(
            resolve(&input, &ResolveContext::default()).custom_bpp,
            Some(0.2)
        );

        input.compression_bpp = Some(0.08);
        let settings = resolve(&input, &ResolveContext::default());
        assert_eq!(settings.custom_bpp, None);
        assert_eq!(settings.compression, ExportCompression::Web);
    }

    #[test]
    fn test_organization_defaults_to_first() {
        let orgs = orgs();
        let ctx = ResolveContext {
            has_transparent_background: false,
            organizations: &orgs,
        };
        let input = raw("Mp4", "link", 30);
        assert_eq!(resolve(&input, &ctx).organization_id.as_deref(), Some("org-a"));
        assert_eq!(input.organization_id, None);

        let mut chosen = input.clone();
        chosen.organization_id = Some("org-b".to_string());
        assert_eq!(resolve(&chosen, &ctx).organization_id.as_deref(), Some("org-b"));
    }

    #[test]
    fn test_snap_fps_nearest_with_lower_tie() {
        assert_eq!(snap_fps(60, &GIF_FPS_OPTIONS), 30);
        assert_eq!(snap_fps(12, &GIF_FPS_OPTIONS), 10);
        assert_eq!(snap_fps(45, &MP4_FPS_OPTIONS), 30);
        assert_eq!(snap_fps(0, &MP4_FPS_OPTIONS), 15);
    }

    fn arb_raw() -> impl Strategy<Value = RawExportSettings> {
        (
            prop::sample::select(vec!["Mp4", "Gif", "Webm", ""]),
            prop::sample::select(vec!["file", "clipboard", "link", "ftp"]),
            0u32..120,
            prop::sample::select(vec!["720p", "1080p", "4k", "8k"]),
            prop::sample::select(vec!["Maximum", "Social", "Web", "Potato", "Lossless"]),
            any::<bool>(),
            prop::option::of(0.0f64..0.6),
            prop::option::of(prop::sample::select(vec!["org-a", "org-z"])),
        )
            .prop_map(
                |(format, export_to, fps, res, compression, advanced_mode, bpp, org)| {
                    RawExportSettings {
                        format: format.to_string(),
                        fps,
                        export_to: export_to.to_string(),
                        resolution: RawResolution {
                            label: res.to_string(),
                            value: res.to_string(),
                            width: 0,
                            height: 0,
                        },
                        compression: compression.to_string(),
                        organization_id: org.map(str::to_string),
                        advanced_mode,
                        compression_bpp: bpp,
                        force_ffmpeg_decoder: false,
                    }
                },
            )
    }

    proptest! {
        #[test]
        fn prop_resolve_is_idempotent(input in arb_raw(), transparent in any::<bool>(), with_orgs in any::<bool>()) {
            let orgs = if with_orgs { orgs() } else { Vec::new() };
            let ctx = ResolveContext { has_transparent_background: transparent, organizations: &orgs };
            let once = resolve(&input, &ctx);
            let twice = resolve(&RawExportSettings::from(&once), &ctx);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_fps_is_legal_for_format(input in arb_raw(), transparent in any::<bool>()) {
            let ctx = ResolveContext { has_transparent_background: transparent, organizations: &[] };
            let settings = resolve(&input, &ctx);
            prop_assert!(settings.format.fps_options().contains(&settings.fps));
        }

        #[test]
        fn prop_link_is_never_gif(input in arb_raw(), transparent in any::<bool>()) {
            let ctx = ResolveContext { has_transparent_background: transparent, organizations: &[] };
            let settings = resolve(&input, &ctx);
            if settings.export_to == ExportDestination::Link {
                prop_assert_eq!(settings.format, ExportFormat::Mp4);
            }
        }

        #[test]
        fn prop_transparent_mp4_becomes_gif(input in arb_raw()) {
            let mut input = input;
            input.format = "Mp4".to_string();
            let ctx = ResolveContext { has_transparent_background: true, organizations: &[] };
            prop_assert_eq!(resolve(&input, &ctx).format, ExportFormat::Gif);
        }
    }
}
