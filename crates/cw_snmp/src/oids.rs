//! DOCSIS OIDs the adapter works with

/// docsIfCmtsCmStatusMacAddress — cable modem MAC address table.
pub const DOCS_IF_CMTS_CM_STATUS_MAC: &str = "1.3.6.1.2.1.10.127.1.3.3.1.2";

/// docsIfCmtsCmStatusIpAddress — cable modem IP address column.
pub const DOCS_IF_CMTS_CM_STATUS_IP: &str = "1.3.6.1.2.1.10.127.1.3.3.1.3";

/// docsIfCmtsCmStatusDownstreamPower — downstream power, tenths of dBmV.
pub const DOCS_IF_CMTS_CM_STATUS_POWER: &str = "1.3.6.1.2.1.10.127.1.3.3.1.6";

/// docsIfCmtsCmStatusValue — modem registration state.
pub const DOCS_IF_CMTS_CM_STATUS_VALUE: &str = "1.3.6.1.2.1.10.127.1.3.3.1.9";

/// system.sysDescr.0
pub const SYS_DESCR: &str = "1.3.6.1.2.1.1.1.0";

/// docsDevSwServer — TFTP server address for firmware loads.
pub const DOCS_DEV_SW_SERVER: &str = "1.3.6.1.2.1.69.1.1.3.0";

/// docsDevSwFilename — firmware image filename.
pub const DOCS_DEV_SW_FILENAME: &str = "1.3.6.1.2.1.69.1.1.4.0";

/// docsDevSwAdminStatus — set to 1 (upgradeFromMgt) to start the load.
pub const DOCS_DEV_SW_ADMIN_STATUS: &str = "1.3.6.1.2.1.69.1.1.5.0";

/// docsDevSwOperStatus — progress of an ongoing load.
pub const DOCS_DEV_SW_OPER_STATUS: &str = "1.3.6.1.2.1.69.1.1.6.0";
