use crossbeam_channel::{bounded, Receiver, Sender};
use dbus::arg::{prop_cast, PropMap, RefArg, Variant};
use dbus::blocking::stdintf::org_freedesktop_dbus::{ObjectManager, Properties};
use dbus::blocking::Connection;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::types::{FEATURES_CHAR_UUID, SERVICE_UUID};

const BLUEZ: &str = "org.bluez";
const DEVICE_IFACE: &str = "org.bluez.Device1";
const SERVICE_IFACE: &str = "org.bluez.GattService1";
const CHAR_IFACE: &str = "org.bluez.GattCharacteristic1";
const SERVICES_RESOLVED_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum BleError {
    #[error("D-Bus error: {0}")]
    DBus(#[from] dbus::Error),

    #[error("No se encontró ningún dispositivo con {keywords:?}. Disponibles: {available:?}")]
    DeviceNotFound {
        keywords: Vec<String>,
        available: Vec<String>,
    },

    #[error("El dispositivo no resolvió sus servicios GATT a tiempo")]
    ServicesNotResolved,

    #[error("Servicio {uuid} no encontrado. Disponibles: {available:?}")]
    ServiceNotFound { uuid: String, available: Vec<String> },

    #[error("Característica {0} no encontrada")]
    CharacteristicNotFound(String),
}

/// Cómo elegir el periférico
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceSelector {
    /// MAC conocida (28:CD:C1:08:37:69), sin escaneo
    Address(String),
    /// Primer dispositivo cuyo nombre contenga alguna palabra clave
    NameKeywords(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct BleConfig {
    pub adapter: String,
    pub device: DeviceSelector,
    pub scan_timeout: Duration,
    pub service_uuid: String,
    pub char_uuid: String,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            adapter: "hci0".to_string(),
            device: DeviceSelector::NameKeywords(vec!["Arduino".to_string(), "Nano".to_string()]),
            scan_timeout: Duration::from_secs(10),
            service_uuid: SERVICE_UUID.to_string(),
            char_uuid: FEATURES_CHAR_UUID.to_string(),
        }
    }
}

/// Estadísticas de recepción BLE
#[derive(Debug, Clone, Default)]
pub struct BleStats {
    pub notifications: u32,
    pub dropped: u32,
}

static NOTIFICATIONS: AtomicU32 = AtomicU32::new(0);
static DROPPED: AtomicU32 = AtomicU32::new(0);

/// Dispositivo visto por BlueZ
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub path: String,
    pub address: Option<String>,
    pub name: Option<String>,
}

impl DeviceInfo {
    pub fn describe(&self) -> String {
        format!(
            "{} ({})",
            self.name.as_deref().unwrap_or("Unknown"),
            self.address.as_deref().unwrap_or("?")
        )
    }
}

/// Servicio o característica GATT con su UUID
#[derive(Debug, Clone, PartialEq)]
pub struct GattEntry {
    pub path: String,
    pub uuid: String,
}

type ManagedObjects = HashMap<dbus::Path<'static>, HashMap<String, PropMap>>;

pub fn device_path(adapter: &str, mac: &str) -> String {
    format!("/org/bluez/{}/dev_{}", adapter, mac.to_uppercase().replace(':', "_"))
}

/// Elige el primer dispositivo cuyo Name/Alias contenga alguna palabra clave
pub fn select_device<'a>(devices: &'a [DeviceInfo], keywords: &[String]) -> Option<&'a DeviceInfo> {
    devices.iter().find(|d| {
        d.name
            .as_deref()
            .map(|name| keywords.iter().any(|k| name.contains(k.as_str())))
            .unwrap_or(false)
    })
}

/// Busca una entrada GATT por UUID dentro del árbol del dispositivo
pub fn find_gatt<'a>(
    entries: &'a [GattEntry],
    device_path: &str,
    uuid: &str,
) -> Option<&'a GattEntry> {
    let prefix = format!("{}/", device_path);
    entries
        .iter()
        .find(|e| e.path.starts_with(&prefix) && e.uuid.eq_ignore_ascii_case(uuid))
}

fn devices_from(objects: &ManagedObjects, adapter: &str) -> Vec<DeviceInfo> {
    let adapter_prefix = format!("/org/bluez/{}/", adapter);
    let mut devices: Vec<DeviceInfo> = objects
        .iter()
        .filter(|(path, _)| path.starts_with(&adapter_prefix))
        .filter_map(|(path, ifaces)| {
            let props = ifaces.get(DEVICE_IFACE)?;
            let name = prop_cast::<String>(props, "Name")
                .or_else(|| prop_cast::<String>(props, "Alias"))
                .cloned();
            Some(DeviceInfo {
                path: path.to_string(),
                address: prop_cast::<String>(props, "Address").cloned(),
                name,
            })
        })
        .collect();
    devices.sort_by(|a, b| a.path.cmp(&b.path));
    devices
}

fn gatt_from(objects: &ManagedObjects, iface: &str) -> Vec<GattEntry> {
    objects
        .iter()
        .filter_map(|(path, ifaces)| {
            let props = ifaces.get(iface)?;
            let uuid = prop_cast::<String>(props, "UUID")?;
            Some(GattEntry {
                path: path.to_string(),
                uuid: uuid.clone(),
            })
        })
        .collect()
}

fn managed_objects(conn: &Connection) -> Result<ManagedObjects, BleError> {
    let root = conn.with_proxy(BLUEZ, "/", Duration::from_secs(5));
    Ok(root.get_managed_objects()?)
}

/// Escanea durante scan_timeout y devuelve la ruta D-Bus del dispositivo elegido
fn find_device(conn: &Connection, config: &BleConfig) -> Result<String, BleError> {
    let keywords = match &config.device {
        DeviceSelector::Address(mac) => return Ok(device_path(&config.adapter, mac)),
        DeviceSelector::NameKeywords(keywords) => keywords,
    };

    let adapter_path = format!("/org/bluez/{}", config.adapter);
    let adapter_proxy = conn.with_proxy(BLUEZ, &adapter_path, Duration::from_secs(5));

    log::info!("🔍 Escaneando {} s en busca de {:?}...", config.scan_timeout.as_secs(), keywords);
    adapter_proxy.method_call::<(), _, _, _>("org.bluez.Adapter1", "StartDiscovery", ())?;
    std::thread::sleep(config.scan_timeout);
    if let Err(e) =
        adapter_proxy.method_call::<(), _, _, _>("org.bluez.Adapter1", "StopDiscovery", ())
    {
        log::debug!("StopDiscovery: {}", e);
    }

    let devices = devices_from(&managed_objects(conn)?, &config.adapter);
    log::info!("📱 {} dispositivos BLE encontrados", devices.len());
    for device in &devices {
        log::debug!("   - {}", device.describe());
    }

    match select_device(&devices, keywords) {
        Some(device) => {
            log::info!("✅ Encontrado: {}", device.describe());
            Ok(device.path.clone())
        }
        None => Err(BleError::DeviceNotFound {
            keywords: keywords.clone(),
            available: devices.iter().map(DeviceInfo::describe).collect(),
        }),
    }
}

fn connect(conn: &Connection, device_path: &str) -> Result<(), BleError> {
    let device_proxy = conn.with_proxy(BLUEZ, device_path, Duration::from_secs(10));

    match device_proxy.method_call::<(), _, _, _>(DEVICE_IFACE, "Connect", ()) {
        Ok(_) => log::info!("✅ Conectado a {}", device_path),
        Err(e) => {
            log::warn!("❌ No se pudo conectar a {}: {}", device_path, e);
            log::info!("⏳ Reintentando en 3 segundos...");
            std::thread::sleep(Duration::from_secs(3));

            device_proxy.method_call::<(), _, _, _>(DEVICE_IFACE, "Connect", ())?;
            log::info!("✅ Conectado en segundo intento");
        }
    }

    // Esperar a que BlueZ publique el árbol GATT
    let start = Instant::now();
    loop {
        let resolved: bool = device_proxy
            .get(DEVICE_IFACE, "ServicesResolved")
            .unwrap_or(false);
        if resolved {
            return Ok(());
        }
        if start.elapsed() > SERVICES_RESOLVED_TIMEOUT {
            return Err(BleError::ServicesNotResolved);
        }
        std::thread::sleep(Duration::from_millis(200));
    }
}

/// Conecta al periférico, activa notificaciones y envía cada valor recibido
/// por el canal. Bloquea hasta que el receptor del canal se cierra.
pub fn start_ble_receiver(config: &BleConfig, tx: Sender<Vec<u8>>) -> Result<(), BleError> {
    let conn = Connection::new_system()?;
    log::info!("🔌 Conectado a D-Bus del sistema");

    let adapter_path = format!("/org/bluez/{}", config.adapter);
    let adapter_proxy = conn.with_proxy(BLUEZ, &adapter_path, Duration::from_secs(5));
    let _: () = adapter_proxy.method_call(
        "org.freedesktop.DBus.Properties",
        "Set",
        ("org.bluez.Adapter1", "Powered", Variant(true)),
    )?;
    log::info!("✅ Adaptador Bluetooth {} encendido", config.adapter);

    let device_path = find_device(&conn, config)?;
    connect(&conn, &device_path)?;

    let objects = managed_objects(&conn)?;
    let services = gatt_from(&objects, SERVICE_IFACE);
    if find_gatt(&services, &device_path, &config.service_uuid).is_none() {
        return Err(BleError::ServiceNotFound {
            uuid: config.service_uuid.clone(),
            available: services
                .iter()
                .filter(|s| s.path.starts_with(&device_path))
                .map(|s| s.uuid.clone())
                .collect(),
        });
    }

    let characteristics = gatt_from(&objects, CHAR_IFACE);
    let char_path = find_gatt(&characteristics, &device_path, &config.char_uuid)
        .map(|c| c.path.clone())
        .ok_or_else(|| BleError::CharacteristicNotFound(config.char_uuid.clone()))?;

    let char_proxy = conn.with_proxy(BLUEZ, &char_path, Duration::from_secs(5));
    char_proxy.method_call::<(), _, _, _>(CHAR_IFACE, "StartNotify", ())?;
    log::info!("📡 Notificaciones BLE iniciadas en {}", char_path);

    use dbus::blocking::stdintf::org_freedesktop_dbus::PropertiesPropertiesChanged as PC;
    use dbus::message::SignalArgs;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_clone = Arc::clone(&stop);
    let char_path_clone = char_path.clone();

    let mr = PC::match_rule(None, None);
    conn.add_match(mr, move |pc: PC, _, msg| {
        if msg.path().map(|p| p.to_string()) != Some(char_path_clone.clone()) {
            return true;
        }

        if let Some(value_var) = pc.changed_properties.get("Value") {
            if let Some(iter) = value_var.0.as_iter() {
                let value: Vec<u8> = iter
                    .filter_map(|item| item.as_u64().map(|b| b as u8))
                    .collect();
                NOTIFICATIONS.fetch_add(1, Ordering::Relaxed);
                match tx.try_send(value) {
                    Ok(()) => {}
                    Err(crossbeam_channel::TrySendError::Full(_)) => {
                        DROPPED.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(crossbeam_channel::TrySendError::Disconnected(_)) => {
                        stop_clone.store(true, Ordering::Relaxed);
                        return false;
                    }
                }
            }
        }
        true
    })?;

    log::info!("🎯 Recibiendo datos BLE en tiempo real...");

    while !stop.load(Ordering::Relaxed) {
        conn.process(Duration::from_secs(1))?;
    }

    if let Err(e) = char_proxy.method_call::<(), _, _, _>(CHAR_IFACE, "StopNotify", ()) {
        log::debug!("StopNotify: {}", e);
    }
    log::info!("⏹️  Notificaciones detenidas");
    Ok(())
}

/// Lanza el receptor en un hilo propio. El canal se cierra si la conexión
/// falla; soltar el Receiver detiene las notificaciones.
pub fn spawn_ble_receiver(config: BleConfig, capacity: usize) -> Receiver<Vec<u8>> {
    let (tx, rx) = bounded::<Vec<u8>>(capacity);
    std::thread::spawn(move || {
        if let Err(e) = start_ble_receiver(&config, tx) {
            log::error!("❌ Error en BLE: {}", e);
        }
    });
    rx
}

/// Obtiene las estadísticas actuales de BLE
pub fn get_stats() -> BleStats {
    BleStats {
        notifications: NOTIFICATIONS.load(Ordering::Relaxed),
        dropped: DROPPED.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(path: &str, name: Option<&str>) -> DeviceInfo {
        DeviceInfo {
            path: path.to_string(),
            address: Some("28:CD:C1:08:37:69".to_string()),
            name: name.map(str::to_string),
        }
    }

    #[test]
    fn device_path_follows_bluez_naming() {
        assert_eq!(
            device_path("hci0", "28:cd:c1:08:37:69"),
            "/org/bluez/hci0/dev_28_CD_C1_08_37_69"
        );
    }

    #[test]
    fn selects_first_device_matching_any_keyword() {
        let devices = vec![
            device("/org/bluez/hci0/dev_A", None),
            device("/org/bluez/hci0/dev_B", Some("JBL Flip")),
            device("/org/bluez/hci0/dev_C", Some("Group5 Nano33")),
            device("/org/bluez/hci0/dev_D", Some("Arduino")),
        ];
        let keywords = vec!["Arduino".to_string(), "Nano".to_string()];
        assert_eq!(
            select_device(&devices, &keywords).map(|d| d.path.as_str()),
            Some("/org/bluez/hci0/dev_C")
        );
        assert!(select_device(&devices, &["group5".to_string()]).is_none());
    }

    #[test]
    fn gatt_lookup_is_scoped_to_device_and_case_insensitive() {
        let entries = vec![
            GattEntry {
                path: "/org/bluez/hci0/dev_X/service0010/char0011".to_string(),
                uuid: FEATURES_CHAR_UUID.to_string(),
            },
            GattEntry {
                path: "/org/bluez/hci0/dev_A/service0010/char0011".to_string(),
                uuid: FEATURES_CHAR_UUID.to_string(),
            },
        ];
        let found = find_gatt(
            &entries,
            "/org/bluez/hci0/dev_A",
            "19B10001-E8F2-537E-4F6C-D104768A1214",
        )
        .unwrap();
        assert_eq!(found.path, "/org/bluez/hci0/dev_A/service0010/char0011");
        assert!(find_gatt(&entries, "/org/bluez/hci0/dev_B", FEATURES_CHAR_UUID).is_none());
    }
}
