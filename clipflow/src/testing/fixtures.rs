//! On-disk fixtures standing in for the external tools.
//!
//! [`install_fake_tools`] writes shell scripts that mimic `edge-tts` and
//! SadTalker closely enough for the real adapters to drive them: same
//! arguments in, same files out.

use crate::adapters::DeviceMode;
use crate::config::AppConfig;
use std::io;
use std::path::{Path, PathBuf};

/// Fake `edge-tts`: writes a few bytes to the `--write-media` target.
pub const FAKE_EDGE_TTS: &str = r#"#!/bin/sh
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "--write-media" ]; then out="$2"; shift; fi
  shift
done
[ -n "$out" ] || { echo "missing --write-media" >&2; exit 2; }
printf 'ID3' > "$out"
"#;

/// Fake SadTalker interpreter: writes a timestamped MP4 into `--result_dir`.
pub const FAKE_SADTALKER: &str = r#"#!/bin/sh
dir=""
while [ $# -gt 0 ]; do
  if [ "$1" = "--result_dir" ]; then dir="$2"; shift; fi
  shift
done
[ -n "$dir" ] || { echo "missing --result_dir" >&2; exit 2; }
[ -f inference.py ] || { echo "not run from the checkout" >&2; exit 2; }
mkdir -p "$dir"
printf 'mp4' > "$dir/2024_01_01_00.00.00.mp4"
"#;

/// Fake SadTalker interpreter that succeeds without writing a video.
pub const SILENT_SADTALKER: &str = "#!/bin/sh\nexit 0\n";

/// Writes an executable script at `path`.
#[cfg(unix)]
pub fn write_script(path: &Path, body: &str) -> io::Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, body)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(path.to_path_buf())
}

/// Installs fake tools, a SadTalker checkout and an avatar under `root`
/// and returns a config wired to them.
///
/// Output goes to `<root>/output` and retries back off by 1 ms.
#[cfg(unix)]
pub fn install_fake_tools(root: &Path) -> io::Result<AppConfig> {
    let bin = root.join("bin");
    let checkout = root.join("sadtalker");
    std::fs::create_dir_all(&checkout)?;
    std::fs::write(checkout.join("inference.py"), "")?;

    let avatar = root.join("avatar.png");
    std::fs::write(&avatar, b"\x89PNG")?;

    let mut config = AppConfig::default();
    config.voice.binary = write_script(&bin.join("edge-tts"), FAKE_EDGE_TTS)?;
    config.animation.python = write_script(&bin.join("python"), FAKE_SADTALKER)?;
    config.animation.sadtalker_path = Some(checkout);
    config.animation.device = DeviceMode::Cpu;
    config.visual.image_path = Some(avatar);
    config.output.root = root.join("output");
    config.retry = config.retry.with_base_delay_ms(1).with_max_delay_ms(5);
    Ok(config)
}
