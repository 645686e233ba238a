use super::VolumeInfo;
use std::ffi::OsString;
use std::os::windows::ffi::OsStrExt;
use std::path::{Component, Path};
use std::ptr;
use winapi::shared::minwindef::{DWORD, MAX_PATH};
use winapi::um::fileapi::GetVolumeInformationW;

pub fn get_drive_letter(path: &Path) -> Option<OsString> {
    for component in path.components() {
        if let Component::Prefix(prefix_comp) = component {
            match prefix_comp.kind() {
                std::path::Prefix::Disk(letter) | std::path::Prefix::VerbatimDisk(letter) => {
                    let drive_letter = (letter as char).to_string();
                    return Some(OsString::from(drive_letter));
                }
                _ => (),
            }
        }
    }
    None
}

/// Serial number and label of the volume holding `path`, when it sits on a lettered drive.
pub fn volume_info(path: &Path) -> VolumeInfo {
    let Some(letter) = get_drive_letter(path) else {
        return VolumeInfo::default();
    };
    let root = format!("{}:\\", letter.to_string_lossy());
    let wide_root: Vec<u16> = OsString::from(root)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();

    let mut label = [0u16; MAX_PATH + 1];
    let mut serial: DWORD = 0;
    // SAFETY: `wide_root` is NUL-terminated and the label buffer length matches.
    let ok = unsafe {
        GetVolumeInformationW(
            wide_root.as_ptr(),
            label.as_mut_ptr(),
            label.len() as DWORD,
            &mut serial,
            ptr::null_mut(),
            ptr::null_mut(),
            ptr::null_mut(),
            0,
        )
    };
    if ok == 0 {
        return VolumeInfo::default();
    }

    let len = label.iter().position(|&c| c == 0).unwrap_or(label.len());
    let label = String::from_utf16_lossy(&label[..len]);
    VolumeInfo {
        serial: Some(format!("{:08X}", serial)),
        label: if label.is_empty() { None } else { Some(label) },
    }
}
