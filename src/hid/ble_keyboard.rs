// BLE HID keyboard transport using ESP-IDF Bluedroid GATT/GAP APIs
// HID-over-GATT keyboard with Battery and Device Information services,
// "just works" bonding, advertising restarted after every disconnect

use core::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use log::{debug, error, info, warn};

use esp_idf_svc::bt::{Ble, BtDriver};
use esp_idf_svc::hal::modem::Modem;
use esp_idf_svc::nvs::EspDefaultNvsPartition;

use super::keyboard::{KeyboardReport, KEYBOARD_REPORT_ID, KEYBOARD_REPORT_MAP, KEYBOARD_REPORT_SIZE};
use super::{HidError, HidResult, HidTransport, KeyCode};
use crate::config::{BATTERY_LEVEL_PERCENT, DEVICE_NAME, MANUFACTURER_NAME};

const HID_APP_ID: u16 = 0;

// GATT declaration and descriptor UUIDs
const PRIMARY_SERVICE_UUID: u16 = 0x2800;
const CHARACTERISTIC_DECLARATION_UUID: u16 = 0x2803;
const CCCD_UUID: u16 = 0x2902;
const REPORT_REFERENCE_UUID: u16 = 0x2908;

// HID service and characteristics
const HID_SERVICE_UUID: u16 = 0x1812;
const HID_INFORMATION_UUID: u16 = 0x2A4A;
const REPORT_MAP_UUID: u16 = 0x2A4B;
const HID_CONTROL_POINT_UUID: u16 = 0x2A4C;
const REPORT_UUID: u16 = 0x2A4D;
const PROTOCOL_MODE_UUID: u16 = 0x2A4E;

// Battery and Device Information services
const BATTERY_SERVICE_UUID: u16 = 0x180F;
const BATTERY_LEVEL_UUID: u16 = 0x2A19;
const DEVICE_INFO_SERVICE_UUID: u16 = 0x180A;
const MANUFACTURER_NAME_UUID: u16 = 0x2A29;
const PNP_ID_UUID: u16 = 0x2A50;

const KEYBOARD_APPEARANCE: i32 = 0x03C1;

// HID service in 128-bit little-endian form, for advertising data
const HID_SERVICE_UUID128: [u8; 16] = [
    0xFB, 0x34, 0x9B, 0x5F, 0x80, 0x00, 0x00, 0x80, 0x00, 0x10, 0x00, 0x00, 0x12, 0x18, 0x00, 0x00,
];

// bcdHID 1.11, country code 0, flags: normally connectable
const HID_INFORMATION: [u8; 4] = [0x11, 0x01, 0x00, 0x02];
const PROTOCOL_MODE_REPORT: u8 = 0x01;
const REPORT_TYPE_INPUT: u8 = 0x01;
const REPORT_TYPE_OUTPUT: u8 = 0x02;

// PnP ID: USB-IF vendor source, Espressif VID, product, version 1.0
const PNP_ID: [u8; 7] = [0x02, 0x3A, 0x30, 0x01, 0x80, 0x00, 0x01];

// Service instance IDs, echoed back in ESP_GATTS_CREAT_ATTR_TAB_EVT
const HID_SERVICE_INST: u8 = 0;
const BATTERY_SERVICE_INST: u8 = 1;
const DEVICE_INFO_SERVICE_INST: u8 = 2;

// Attribute indexes inside the HID table
const HID_IDX_INPUT_REPORT_VALUE: usize = 10;
const HID_IDX_INPUT_REPORT_CCCD: usize = 11;
const HID_ATTR_COUNT: usize = 16;

// Global state for BLE operations
static HID_STARTED: AtomicBool = AtomicBool::new(false);
static HOST_CONNECTED: AtomicBool = AtomicBool::new(false);

// Link state shared between Bluedroid callbacks and sending tasks
static LINK_STATE: Mutex<CriticalSectionRawMutex, RefCell<LinkState>> =
    Mutex::new(RefCell::new(LinkState::new()));

struct LinkState {
    gatts_if: esp_idf_sys::esp_gatt_if_t,
    conn_id: Option<u16>,
    input_report_handle: u16,
    input_cccd_handle: u16,
    notifications_enabled: bool,
}

impl LinkState {
    const fn new() -> Self {
        Self {
            gatts_if: 0,
            conn_id: None,
            input_report_handle: 0,
            input_cccd_handle: 0,
            notifications_enabled: false,
        }
    }
}

fn with_link_state<F, R>(f: F) -> R
where
    F: FnOnce(&mut LinkState) -> R,
{
    LINK_STATE.lock(|state| f(&mut state.borrow_mut()))
}

/// Bluedroid HID-over-GATT keyboard.
pub struct BleHidKeyboard {
    _bt_driver: BtDriver<'static, Ble>,
}

impl BleHidKeyboard {
    /// Bring up the BLE controller and Bluedroid. Services and advertising
    /// start in [`HidTransport::begin`].
    pub fn new(modem: Modem, nvs: EspDefaultNvsPartition) -> HidResult<Self> {
        info!("🔧 Initializing Bluetooth controller for HID keyboard");

        let bt_driver = BtDriver::<Ble>::new(modem, Some(nvs)).map_err(|e| {
            HidError::EspError(e.code(), "Bluetooth driver initialization".to_string())
        })?;

        info!("✅ Bluetooth controller and Bluedroid enabled");
        Ok(Self {
            _bt_driver: bt_driver,
        })
    }

    fn send_report(&self, report: &KeyboardReport) -> HidResult<()> {
        let (gatts_if, conn_id, handle, notifications_enabled) = with_link_state(|state| {
            (
                state.gatts_if,
                state.conn_id,
                state.input_report_handle,
                state.notifications_enabled,
            )
        });

        let conn_id = conn_id.ok_or(HidError::NotConnected)?;
        if handle == 0 {
            return Err(HidError::NotInitialized(
                "input report handle not assigned".to_string(),
            ));
        }
        // Bonded hosts may skip the CCCD write on reconnect, so send anyway
        if !notifications_enabled {
            debug!("⌨️ Input notifications not enabled by host in this session");
        }

        let mut bytes = report.to_bytes();
        call_esp_api_with_context(
            || unsafe {
                esp_idf_sys::esp_ble_gatts_send_indicate(
                    gatts_if,
                    conn_id,
                    handle,
                    KEYBOARD_REPORT_SIZE as u16,
                    bytes.as_mut_ptr(),
                    false,
                )
            },
            "Input report notification",
        )
        .map_err(|e| HidError::NotifyFailed(e.to_string()))
    }
}

impl HidTransport for BleHidKeyboard {
    fn begin(&self) -> HidResult<()> {
        if HID_STARTED.swap(true, Ordering::SeqCst) {
            return Err(HidError::AlreadyInitialized(
                "HID keyboard already started".to_string(),
            ));
        }

        info!("🔧 Registering HID GATT and GAP callbacks");

        call_esp_api_with_context(
            || unsafe { esp_idf_sys::esp_ble_gatts_register_callback(Some(gatts_event_handler)) },
            "GATT server callback registration",
        )?;
        call_esp_api_with_context(
            || unsafe { esp_idf_sys::esp_ble_gap_register_callback(Some(gap_event_handler)) },
            "GAP callback registration",
        )?;

        configure_security()?;

        // Services and advertising are set up from ESP_GATTS_REG_EVT
        call_esp_api_with_context(
            || unsafe { esp_idf_sys::esp_ble_gatts_app_register(HID_APP_ID) },
            "GATT application registration",
        )?;

        info!("✅ HID keyboard registered, advertising as '{}'", DEVICE_NAME);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        HOST_CONNECTED.load(Ordering::Acquire)
    }

    fn send_key(&self, key: KeyCode) {
        let result = self
            .send_report(&KeyboardReport::press(key))
            .and_then(|_| self.send_report(&KeyboardReport::released()));

        match result {
            Ok(()) => debug!("⌨️ Sent {:?}", key),
            Err(e) => warn!("⚠️ Failed to send {:?}: {}", key, e),
        }
    }
}

// Bonding without MITM protection ("just works"), keys distributed both ways
fn configure_security() -> HidResult<()> {
    let mut auth_req = esp_idf_sys::ESP_LE_AUTH_BOND as u8;
    let mut io_cap = esp_idf_sys::ESP_IO_CAP_NONE as u8;
    let mut key_size: u8 = 16;
    let mut init_key = (esp_idf_sys::ESP_BLE_ENC_KEY_MASK | esp_idf_sys::ESP_BLE_ID_KEY_MASK) as u8;
    let mut rsp_key = init_key;

    let params: [(esp_idf_sys::esp_ble_sm_param_t, &mut u8, &str); 5] = [
        (
            esp_idf_sys::esp_ble_sm_param_t_ESP_BLE_SM_AUTHEN_REQ_MODE,
            &mut auth_req,
            "Security auth mode",
        ),
        (
            esp_idf_sys::esp_ble_sm_param_t_ESP_BLE_SM_IOCAP_MODE,
            &mut io_cap,
            "Security IO capability",
        ),
        (
            esp_idf_sys::esp_ble_sm_param_t_ESP_BLE_SM_MAX_KEY_SIZE,
            &mut key_size,
            "Security max key size",
        ),
        (
            esp_idf_sys::esp_ble_sm_param_t_ESP_BLE_SM_SET_INIT_KEY,
            &mut init_key,
            "Security initiator keys",
        ),
        (
            esp_idf_sys::esp_ble_sm_param_t_ESP_BLE_SM_SET_RSP_KEY,
            &mut rsp_key,
            "Security responder keys",
        ),
    ];

    for (param, value, context) in params {
        call_esp_api_with_context(
            || unsafe {
                esp_idf_sys::esp_ble_gap_set_security_param(
                    param,
                    value as *mut u8 as *mut core::ffi::c_void,
                    1,
                )
            },
            context,
        )?;
    }

    Ok(())
}

// GATT attribute table builder.
//
// Bluedroid reads UUID and value buffers after `esp_ble_gatts_create_attr_tab`
// returns, so every buffer is leaked and lives for the rest of the program.
struct AttrTable {
    entries: Vec<esp_idf_sys::esp_gatts_attr_db_t>,
}

impl AttrTable {
    fn service(uuid: u16) -> Self {
        let mut table = Self {
            entries: Vec::new(),
        };
        table.push(PRIMARY_SERVICE_UUID, esp_idf_sys::ESP_GATT_PERM_READ as u16, &uuid.to_le_bytes(), 2);
        table
    }

    fn characteristic(&mut self, uuid: u16, properties: u32, perm: u32, value: &[u8], max_len: usize) {
        self.push(
            CHARACTERISTIC_DECLARATION_UUID,
            esp_idf_sys::ESP_GATT_PERM_READ as u16,
            &[properties as u8],
            1,
        );
        self.push(uuid, perm as u16, value, max_len);
    }

    fn descriptor(&mut self, uuid: u16, perm: u32, value: &[u8]) {
        self.push(uuid, perm as u16, value, value.len());
    }

    fn push(&mut self, uuid: u16, perm: u16, value: &[u8], max_len: usize) {
        let uuid: &'static mut [u8] = Box::leak(uuid.to_le_bytes().to_vec().into_boxed_slice());

        let mut buffer = value.to_vec();
        buffer.resize(max_len.max(value.len()), 0);
        let buffer: &'static mut [u8] = Box::leak(buffer.into_boxed_slice());

        self.entries.push(esp_idf_sys::esp_gatts_attr_db_t {
            attr_control: esp_idf_sys::esp_attr_control_t {
                auto_rsp: esp_idf_sys::ESP_GATT_AUTO_RSP as u8,
            },
            att_desc: esp_idf_sys::esp_attr_desc_t {
                uuid_length: esp_idf_sys::ESP_UUID_LEN_16 as u16,
                uuid_p: uuid.as_mut_ptr(),
                perm,
                max_length: buffer.len() as u16,
                length: value.len() as u16,
                value: buffer.as_mut_ptr(),
            },
        });
    }

    fn register(self, gatts_if: esp_idf_sys::esp_gatt_if_t, inst_id: u8, context: &str) -> HidResult<()> {
        let entries: &'static [esp_idf_sys::esp_gatts_attr_db_t] =
            Box::leak(self.entries.into_boxed_slice());

        call_esp_api_with_context(
            || unsafe {
                esp_idf_sys::esp_ble_gatts_create_attr_tab(
                    entries.as_ptr(),
                    gatts_if,
                    entries.len() as _,
                    inst_id,
                )
            },
            context,
        )
    }
}

fn hid_service_table() -> AttrTable {
    use esp_idf_sys::{
        ESP_GATT_CHAR_PROP_BIT_NOTIFY as NOTIFY, ESP_GATT_CHAR_PROP_BIT_READ as READ,
        ESP_GATT_CHAR_PROP_BIT_WRITE as WRITE, ESP_GATT_CHAR_PROP_BIT_WRITE_NR as WRITE_NR,
        ESP_GATT_PERM_READ as PERM_READ, ESP_GATT_PERM_READ_ENCRYPTED as PERM_READ_ENC,
        ESP_GATT_PERM_WRITE as PERM_WRITE, ESP_GATT_PERM_WRITE_ENCRYPTED as PERM_WRITE_ENC,
    };

    let mut table = AttrTable::service(HID_SERVICE_UUID);
    table.characteristic(HID_INFORMATION_UUID, READ, PERM_READ, &HID_INFORMATION, HID_INFORMATION.len());
    table.characteristic(REPORT_MAP_UUID, READ, PERM_READ, &KEYBOARD_REPORT_MAP, KEYBOARD_REPORT_MAP.len());
    table.characteristic(HID_CONTROL_POINT_UUID, WRITE_NR, PERM_READ | PERM_WRITE, &[0], 1);
    table.characteristic(
        PROTOCOL_MODE_UUID,
        READ | WRITE_NR,
        PERM_READ | PERM_WRITE,
        &[PROTOCOL_MODE_REPORT],
        1,
    );

    // Keyboard input report: value, CCCD, report reference
    table.characteristic(
        REPORT_UUID,
        READ | NOTIFY,
        PERM_READ_ENC,
        &KeyboardReport::released().to_bytes(),
        KEYBOARD_REPORT_SIZE,
    );
    table.descriptor(CCCD_UUID, PERM_READ | PERM_WRITE, &[0x00, 0x00]);
    table.descriptor(REPORT_REFERENCE_UUID, PERM_READ, &[KEYBOARD_REPORT_ID, REPORT_TYPE_INPUT]);

    // LED output report: value, report reference
    table.characteristic(
        REPORT_UUID,
        READ | WRITE | WRITE_NR,
        PERM_READ_ENC | PERM_WRITE_ENC,
        &[0x00],
        1,
    );
    table.descriptor(REPORT_REFERENCE_UUID, PERM_READ, &[KEYBOARD_REPORT_ID, REPORT_TYPE_OUTPUT]);

    debug_assert_eq!(table.entries.len(), HID_ATTR_COUNT);
    table
}

fn battery_service_table() -> AttrTable {
    let mut table = AttrTable::service(BATTERY_SERVICE_UUID);
    table.characteristic(
        BATTERY_LEVEL_UUID,
        esp_idf_sys::ESP_GATT_CHAR_PROP_BIT_READ | esp_idf_sys::ESP_GATT_CHAR_PROP_BIT_NOTIFY,
        esp_idf_sys::ESP_GATT_PERM_READ,
        &[BATTERY_LEVEL_PERCENT],
        1,
    );
    table.descriptor(
        CCCD_UUID,
        esp_idf_sys::ESP_GATT_PERM_READ | esp_idf_sys::ESP_GATT_PERM_WRITE,
        &[0x00, 0x00],
    );
    table
}

fn device_info_service_table() -> AttrTable {
    let mut table = AttrTable::service(DEVICE_INFO_SERVICE_UUID);
    table.characteristic(
        MANUFACTURER_NAME_UUID,
        esp_idf_sys::ESP_GATT_CHAR_PROP_BIT_READ,
        esp_idf_sys::ESP_GATT_PERM_READ,
        MANUFACTURER_NAME.as_bytes(),
        MANUFACTURER_NAME.len(),
    );
    table.characteristic(
        PNP_ID_UUID,
        esp_idf_sys::ESP_GATT_CHAR_PROP_BIT_READ,
        esp_idf_sys::ESP_GATT_PERM_READ,
        &PNP_ID,
        PNP_ID.len(),
    );
    table
}

// Device name, advertising data and the three attribute tables
fn setup_services(gatts_if: esp_idf_sys::esp_gatt_if_t) -> HidResult<()> {
    let device_name = std::ffi::CString::new(DEVICE_NAME)
        .map_err(|_| HidError::ServiceRegistrationFailed("Invalid device name".to_string()))?;
    call_esp_api_with_context(
        || unsafe { esp_idf_sys::esp_ble_gap_set_device_name(device_name.as_ptr()) },
        "Device name setting",
    )?;

    let mut service_uuid = HID_SERVICE_UUID128;
    let mut adv_data = esp_idf_sys::esp_ble_adv_data_t {
        set_scan_rsp: false,
        include_name: true,
        include_txpower: false,
        min_interval: 0x0006, // 7.5ms slave connection interval
        max_interval: 0x0010, // 20ms
        appearance: KEYBOARD_APPEARANCE,
        manufacturer_len: 0,
        p_manufacturer_data: std::ptr::null_mut(),
        service_data_len: 0,
        p_service_data: std::ptr::null_mut(),
        service_uuid_len: service_uuid.len() as u16,
        p_service_uuid: service_uuid.as_mut_ptr(),
        flag: (esp_idf_sys::ESP_BLE_ADV_FLAG_GEN_DISC | esp_idf_sys::ESP_BLE_ADV_FLAG_BREDR_NOT_SPT)
            as u8,
    };
    call_esp_api_with_context(
        || unsafe { esp_idf_sys::esp_ble_gap_config_adv_data(&mut adv_data) },
        "Advertising data configuration",
    )?;

    hid_service_table()
        .register(gatts_if, HID_SERVICE_INST, "HID service table")
        .map_err(|e| HidError::ServiceRegistrationFailed(e.to_string()))?;
    battery_service_table()
        .register(gatts_if, BATTERY_SERVICE_INST, "Battery service table")
        .map_err(|e| HidError::ServiceRegistrationFailed(e.to_string()))?;
    device_info_service_table()
        .register(gatts_if, DEVICE_INFO_SERVICE_INST, "Device information table")
        .map_err(|e| HidError::ServiceRegistrationFailed(e.to_string()))?;

    Ok(())
}

fn start_advertising() -> HidResult<()> {
    let mut adv_params = esp_idf_sys::esp_ble_adv_params_t {
        adv_int_min: 0x20, // 32 * 0.625ms = 20ms
        adv_int_max: 0x30, // 48 * 0.625ms = 30ms
        adv_type: esp_idf_sys::esp_ble_adv_type_t_ADV_TYPE_IND,
        own_addr_type: esp_idf_sys::esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
        peer_addr: [0; 6],
        peer_addr_type: esp_idf_sys::esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
        channel_map: esp_idf_sys::esp_ble_adv_channel_t_ADV_CHNL_ALL,
        adv_filter_policy: esp_idf_sys::esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
    };

    call_esp_api_with_context(
        || unsafe { esp_idf_sys::esp_ble_gap_start_advertising(&mut adv_params) },
        "Advertising start",
    )
    .map_err(|e| HidError::AdvertisingStartFailed(e.to_string()))
}

// GATT server event handler with panic safety
extern "C" fn gatts_event_handler(
    event: esp_idf_sys::esp_gatts_cb_event_t,
    gatts_if: esp_idf_sys::esp_gatt_if_t,
    param: *mut esp_idf_sys::esp_ble_gatts_cb_param_t,
) {
    // Never unwind into C
    let result = std::panic::catch_unwind(|| gatts_event_handler_impl(event, gatts_if, param));

    if let Err(panic_info) = result {
        error!("🚨 PANIC in GATT event handler: {:?}", panic_info);
    }
}

fn gatts_event_handler_impl(
    event: esp_idf_sys::esp_gatts_cb_event_t,
    gatts_if: esp_idf_sys::esp_gatt_if_t,
    param: *mut esp_idf_sys::esp_ble_gatts_cb_param_t,
) {
    if param.is_null() {
        return;
    }

    match event {
        esp_idf_sys::esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => {
            let reg = unsafe { &(*param).reg };
            if reg.status != esp_idf_sys::esp_gatt_status_t_ESP_GATT_OK {
                error!("❌ GATT app registration failed, status {}", reg.status);
                return;
            }
            info!("📋 GATT server registered with interface: {}", gatts_if);
            with_link_state(|state| state.gatts_if = gatts_if);

            if let Err(e) = setup_services(gatts_if) {
                error!("❌ HID service setup failed: {}", e);
            }
        }
        esp_idf_sys::esp_gatts_cb_event_t_ESP_GATTS_CREAT_ATTR_TAB_EVT => {
            let tab = unsafe { &(*param).add_attr_tab };
            if tab.status != esp_idf_sys::esp_gatt_status_t_ESP_GATT_OK || tab.handles.is_null() {
                error!(
                    "❌ Attribute table {} creation failed, status {}",
                    tab.svc_inst_id, tab.status
                );
                return;
            }
            let handles = unsafe { std::slice::from_raw_parts(tab.handles, tab.num_handle as usize) };

            match tab.svc_inst_id {
                HID_SERVICE_INST if handles.len() == HID_ATTR_COUNT => {
                    with_link_state(|state| {
                        state.input_report_handle = handles[HID_IDX_INPUT_REPORT_VALUE];
                        state.input_cccd_handle = handles[HID_IDX_INPUT_REPORT_CCCD];
                    });
                }
                BATTERY_SERVICE_INST | DEVICE_INFO_SERVICE_INST => {}
                other => {
                    warn!("⚠️ Unexpected attribute table {} with {} handles", other, handles.len());
                    return;
                }
            }

            info!(
                "📋 Service {} created with {} attributes",
                tab.svc_inst_id,
                handles.len()
            );
            if let Err(e) = call_esp_api_with_context(
                || unsafe { esp_idf_sys::esp_ble_gatts_start_service(handles[0]) },
                "GATT service start",
            ) {
                error!("❌ {}", e);
            }
        }
        esp_idf_sys::esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
            let connect = unsafe { &(*param).connect };
            let mut peer = connect.remote_bda;
            info!("🔗 Host connected, conn_id {}", connect.conn_id);

            with_link_state(|state| {
                state.conn_id = Some(connect.conn_id);
                state.notifications_enabled = false;
            });
            HOST_CONNECTED.store(true, Ordering::Release);

            if let Err(e) = call_esp_api_with_context(
                || unsafe {
                    esp_idf_sys::esp_ble_set_encryption(
                        peer.as_mut_ptr(),
                        esp_idf_sys::esp_ble_sec_act_t_ESP_BLE_SEC_ENCRYPT_NO_MITM,
                    )
                },
                "Link encryption request",
            ) {
                warn!("⚠️ {}", e);
            }
        }
        esp_idf_sys::esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => {
            let disconnect = unsafe { &(*param).disconnect };
            info!("🔌 Host disconnected, reason {:#x}", disconnect.reason);

            HOST_CONNECTED.store(false, Ordering::Release);
            with_link_state(|state| {
                state.conn_id = None;
                state.notifications_enabled = false;
            });

            if let Err(e) = start_advertising() {
                error!("❌ Failed to restart advertising: {}", e);
            }
        }
        esp_idf_sys::esp_gatts_cb_event_t_ESP_GATTS_WRITE_EVT => {
            let write = unsafe { &(*param).write };
            let is_input_cccd = with_link_state(|state| write.handle == state.input_cccd_handle);
            if is_input_cccd && !write.value.is_null() && write.len >= 1 {
                let enabled = unsafe { *write.value } & 0x01 != 0;
                with_link_state(|state| state.notifications_enabled = enabled);
                info!(
                    "⌨️ Keyboard input notifications {}",
                    if enabled { "enabled" } else { "disabled" }
                );
            } else {
                debug!("📝 GATT write to handle {}", write.handle);
            }
        }
        _ => {
            debug!("📋 GATT event: {}", event);
        }
    }
}

// GAP event handler with panic safety
extern "C" fn gap_event_handler(
    event: esp_idf_sys::esp_gap_ble_cb_event_t,
    param: *mut esp_idf_sys::esp_ble_gap_cb_param_t,
) {
    // Never unwind into C
    let result = std::panic::catch_unwind(|| gap_event_handler_impl(event, param));

    if let Err(panic_info) = result {
        error!("🚨 PANIC in GAP event handler: {:?}", panic_info);
    }
}

fn gap_event_handler_impl(
    event: esp_idf_sys::esp_gap_ble_cb_event_t,
    param: *mut esp_idf_sys::esp_ble_gap_cb_param_t,
) {
    if param.is_null() {
        return;
    }

    match event {
        esp_idf_sys::esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_DATA_SET_COMPLETE_EVT => {
            if let Err(e) = start_advertising() {
                error!("❌ {}", e);
            }
        }
        esp_idf_sys::esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_START_COMPLETE_EVT => {
            let status = unsafe { (*param).adv_start_cmpl.status };
            if status == esp_idf_sys::esp_bt_status_t_ESP_BT_STATUS_SUCCESS {
                info!("📡 Advertising as '{}', waiting for connection", DEVICE_NAME);
            } else {
                error!("❌ Advertising start failed, status {}", status);
            }
        }
        esp_idf_sys::esp_gap_ble_cb_event_t_ESP_GAP_BLE_SEC_REQ_EVT => {
            let mut peer = unsafe { (*param).ble_security.ble_req.bd_addr };
            if let Err(e) = call_esp_api_with_context(
                || unsafe { esp_idf_sys::esp_ble_gap_security_rsp(peer.as_mut_ptr(), true) },
                "Security response",
            ) {
                warn!("⚠️ {}", e);
            }
        }
        esp_idf_sys::esp_gap_ble_cb_event_t_ESP_GAP_BLE_AUTH_CMPL_EVT => {
            let auth = unsafe { (*param).ble_security.auth_cmpl };
            if auth.success {
                info!("🔐 Pairing complete");
            } else {
                warn!("⚠️ Pairing failed, reason {:#x}", auth.fail_reason);
            }
        }
        _ => {
            debug!("📡 GAP event: {}", event);
        }
    }
}

// ESP API wrapper mapping esp_err_t to HidError with call context
fn call_esp_api_with_context<F>(f: F, context: &str) -> HidResult<()>
where
    F: FnOnce() -> esp_idf_sys::esp_err_t,
{
    let result = f();
    if result == esp_idf_sys::ESP_OK {
        Ok(())
    } else {
        let error_msg = match result {
            esp_idf_sys::ESP_ERR_INVALID_STATE => {
                format!("{}: Invalid state - BLE stack not ready", context)
            }
            esp_idf_sys::ESP_ERR_INVALID_ARG => format!("{}: Invalid argument", context),
            esp_idf_sys::ESP_ERR_NO_MEM => format!("{}: Out of memory", context),
            esp_idf_sys::ESP_FAIL => format!("{}: Failed", context),
            _ => format!("{}: Unknown error", context),
        };
        Err(HidError::EspError(result, error_msg))
    }
}
