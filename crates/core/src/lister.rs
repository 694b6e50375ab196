//! Endpoint enumeration from Linux sysfs.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use portclaim_protocol::EndpointDescriptor;
use tracing::trace;

use crate::error::{Error, Result};
use crate::transport::EndpointLister;

/// USB identity files and the attribute names they are reported under.
const USB_ATTRIBUTES: &[(&str, &str)] = &[
	("manufacturer", "manufacturer"),
	("product", "product"),
	("serial", "serialNumber"),
	("idVendor", "vendorId"),
	("idProduct", "productId"),
];

/// How far above the tty's device node the USB device directory may sit.
const MAX_USB_DEPTH: usize = 4;

/// Lists tty devices backed by real hardware via `/sys/class/tty`.
///
/// Entries without a `device` link (virtual consoles, ptys) are skipped.
/// USB-backed entries carry `manufacturer`, `product`, `serialNumber`,
/// `vendorId` and `productId` when the kernel exposes them.
#[derive(Debug, Clone)]
pub struct SysfsLister {
	class_root: PathBuf,
	dev_root: PathBuf,
}

impl Default for SysfsLister {
	fn default() -> Self {
		Self::new()
	}
}

impl SysfsLister {
	pub fn new() -> Self {
		Self::with_roots("/sys/class/tty", "/dev")
	}

	/// Uses alternate sysfs class and device roots.
	pub fn with_roots(class_root: impl Into<PathBuf>, dev_root: impl Into<PathBuf>) -> Self {
		Self {
			class_root: class_root.into(),
			dev_root: dev_root.into(),
		}
	}

	/// Synchronous scan, sorted by device name.
	pub fn scan(&self) -> Result<Vec<EndpointDescriptor>> {
		let entries = fs::read_dir(&self.class_root)
			.map_err(|err| Error::Listing(format!("{}: {err}", self.class_root.display())))?;

		let mut names: Vec<String> = entries
			.filter_map(|entry| entry.ok())
			.filter_map(|entry| entry.file_name().into_string().ok())
			.collect();
		names.sort();

		let mut endpoints = Vec::new();
		for name in names {
			let Ok(device) = fs::canonicalize(self.class_root.join(&name).join("device")) else {
				trace!(target = "portclaim.lister", tty = %name, "no device link; skipping");
				continue;
			};

			let mut endpoint = EndpointDescriptor::new(self.dev_root.join(&name).to_string_lossy());
			if let Some(usb) = find_usb_device(&device) {
				for (file, attribute) in USB_ATTRIBUTES {
					if let Some(value) = read_attribute(&usb.join(file)) {
						endpoint.attributes.insert((*attribute).to_string(), value);
					}
				}
			}
			endpoints.push(endpoint);
		}

		Ok(endpoints)
	}
}

#[async_trait]
impl EndpointLister for SysfsLister {
	async fn list(&self) -> Result<Vec<EndpointDescriptor>> {
		let lister = self.clone();
		tokio::task::spawn_blocking(move || lister.scan())
			.await
			.map_err(|err| Error::Listing(err.to_string()))?
	}
}

fn find_usb_device(device: &Path) -> Option<PathBuf> {
	device
		.ancestors()
		.take(MAX_USB_DEPTH + 1)
		.find(|dir| dir.join("idVendor").is_file())
		.map(Path::to_path_buf)
}

fn read_attribute(path: &Path) -> Option<String> {
	let value = fs::read_to_string(path).ok()?;
	let value = value.trim();
	(!value.is_empty()).then(|| value.to_string())
}

#[cfg(all(test, unix))]
mod tests {
	use std::os::unix::fs::symlink;

	use tempfile::TempDir;

	use super::*;

	struct FakeSysfs {
		_dir: TempDir,
		class: PathBuf,
		devices: PathBuf,
	}

	fn fake_sysfs() -> FakeSysfs {
		let dir = TempDir::new().unwrap();
		let class = dir.path().join("class/tty");
		let devices = dir.path().join("devices");
		fs::create_dir_all(&class).unwrap();
		fs::create_dir_all(&devices).unwrap();
		FakeSysfs { _dir: dir, class, devices }
	}

	fn add_usb_tty(sys: &FakeSysfs, name: &str, usb: &str, files: &[(&str, &str)]) {
		let usb_dir = sys.devices.join(usb);
		let node = usb_dir.join(format!("{usb}:1.0")).join(name);
		fs::create_dir_all(&node).unwrap();
		for (file, value) in files {
			fs::write(usb_dir.join(file), format!("{value}\n")).unwrap();
		}
		fs::create_dir_all(sys.class.join(name)).unwrap();
		symlink(&node, sys.class.join(name).join("device")).unwrap();
	}

	#[test]
	fn reports_usb_identity_attributes() {
		let sys = fake_sysfs();
		add_usb_tty(
			&sys,
			"ttyUSB0",
			"1-1",
			&[("idVendor", "0403"), ("idProduct", "6001"), ("manufacturer", "FTDI"), ("serial", "A10K")],
		);

		let endpoints = SysfsLister::with_roots(&sys.class, "/dev").scan().unwrap();
		assert_eq!(endpoints.len(), 1);
		let ep = &endpoints[0];
		assert_eq!(ep.path, "/dev/ttyUSB0");
		assert_eq!(ep.attribute("vendorId"), Some("0403"));
		assert_eq!(ep.attribute("productId"), Some("6001"));
		assert_eq!(ep.attribute("manufacturer"), Some("FTDI"));
		assert_eq!(ep.attribute("serialNumber"), Some("A10K"));
		assert_eq!(ep.attribute("product"), None);
	}

	#[test]
	fn skips_entries_without_device_link_and_sorts() {
		let sys = fake_sysfs();
		add_usb_tty(&sys, "ttyUSB1", "1-2", &[("idVendor", "2341")]);
		add_usb_tty(&sys, "ttyACM0", "1-3", &[("idVendor", "2341")]);
		fs::create_dir_all(sys.class.join("tty0")).unwrap();

		let paths: Vec<String> = SysfsLister::with_roots(&sys.class, "/dev")
			.scan()
			.unwrap()
			.into_iter()
			.map(|ep| ep.path)
			.collect();
		assert_eq!(paths, vec!["/dev/ttyACM0", "/dev/ttyUSB1"]);
	}

	#[test]
	fn non_usb_device_has_no_attributes() {
		let sys = fake_sysfs();
		let node = sys.devices.join("platform/serial8250/tty/ttyS0");
		fs::create_dir_all(&node).unwrap();
		fs::create_dir_all(sys.class.join("ttyS0")).unwrap();
		symlink(&node, sys.class.join("ttyS0").join("device")).unwrap();

		let endpoints = SysfsLister::with_roots(&sys.class, "/dev").scan().unwrap();
		assert_eq!(endpoints, vec![EndpointDescriptor::new("/dev/ttyS0")]);
	}

	#[tokio::test]
	async fn missing_class_root_is_a_listing_error() {
		let dir = TempDir::new().unwrap();
		let err = SysfsLister::with_roots(dir.path().join("absent"), "/dev").list().await.unwrap_err();
		assert!(matches!(err, Error::Listing(_)), "unexpected error: {err}");
	}
}
