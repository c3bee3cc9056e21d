//! Pipeline-string construction and hardware-encoder selection.

use rd_core::{EncoderConfig, PixelFormat};

/// Highest-to-lowest priority candidate (element name, extra properties,
/// parser element name) for the configured output codec. The first element
/// GStreamer reports as available wins; `x264enc`/`x265enc` are always
/// present when `gst-plugins-ugly`/`-bad` are installed and serve as the
/// software fallback.
fn candidates(output_format: PixelFormat) -> &'static [(&'static str, &'static str, &'static str)] {
    match output_format {
        PixelFormat::H265 => &[
            ("vaapih265enc", "rate-control=cbr", "h265parse"),
            ("nvh265enc", "preset=low-latency-hq rc-mode=cbr", "h265parse"),
            ("x265enc", "tune=zerolatency", "h265parse"),
        ],
        _ => &[
            ("vaapih264enc", "rate-control=cbr quality-level=6", "h264parse"),
            ("nvh264enc", "preset=low-latency-hq rc-mode=cbr", "h264parse"),
            ("x264enc", "tune=zerolatency speed-preset=veryfast", "h264parse"),
        ],
    }
}

pub(crate) struct SelectedEncoder {
    pub element: &'static str,
    pub props: &'static str,
    pub parser: &'static str,
}

pub(crate) fn select_encoder(output_format: PixelFormat) -> SelectedEncoder {
    for (element, props, parser) in candidates(output_format) {
        if gstreamer::ElementFactory::find(element).is_some() {
            tracing::info!("encoder selected: {element}");
            return SelectedEncoder { element, props, parser };
        }
    }
    let fallback = candidates(output_format).last().expect("non-empty candidate list");
    tracing::warn!("no preferred hardware encoder found; falling back to {}", fallback.0);
    SelectedEncoder { element: fallback.0, props: fallback.1, parser: fallback.2 }
}

/// Builds the `appsrc ! ... ! appsink` launch string for one encode session.
/// `enc` and `sink` are stable element names looked up afterwards via
/// `pipeline.by_name`.
pub(crate) fn build_launch_string(config: &EncoderConfig, selected: &SelectedEncoder) -> String {
    format!(
        "appsrc name=src is-live=true format=time \
         caps=\"video/x-raw,format=I420,width={w},height={h},framerate={fps}/1\" \
         ! {element} name=enc {props} bitrate={bitrate} key-int-max={keyframe_interval} \
         ! video/x-{codec},stream-format=byte-stream,alignment=au \
         ! {parser} \
         ! appsink name=sink max-buffers=4 drop=false sync=false emit-signals=false",
        w = config.width,
        h = config.height,
        fps = config.fps,
        element = selected.element,
        props = selected.props,
        bitrate = config.bitrate,
        keyframe_interval = config.keyframe_interval,
        codec = if config.output_format == PixelFormat::H265 { "h265" } else { "h264" },
        parser = selected.parser,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_string_embeds_resolution_and_bitrate() {
        let config = EncoderConfig {
            width: 1280,
            height: 720,
            fps: 30,
            bitrate: 4000,
            keyframe_interval: 60,
            input_format: PixelFormat::I420,
            output_format: PixelFormat::H264,
        };
        let selected = SelectedEncoder { element: "x264enc", props: "tune=zerolatency", parser: "h264parse" };
        let launch = build_launch_string(&config, &selected);
        assert!(launch.contains("width=1280,height=720"));
        assert!(launch.contains("bitrate=4000"));
        assert!(launch.contains("key-int-max=60"));
        assert!(launch.contains("video/x-h264"));
    }

    #[test]
    fn h265_output_selects_h265_caps_and_parser() {
        let config = EncoderConfig {
            width: 640,
            height: 480,
            fps: 30,
            bitrate: 2000,
            keyframe_interval: 30,
            input_format: PixelFormat::I420,
            output_format: PixelFormat::H265,
        };
        let selected = SelectedEncoder { element: "x265enc", props: "tune=zerolatency", parser: "h265parse" };
        let launch = build_launch_string(&config, &selected);
        assert!(launch.contains("video/x-h265"));
        assert!(launch.contains("h265parse"));
    }
}
