//! Address and UUID validators
//!
//! Both check the separated-hex-group shape first and then the canonical
//! length, so `"00:12:47:08:9A:A6"` and
//! `"00001101-0000-1000-8000-00805F9B34FB"` are accepted while shorter or
//! longer group layouts are not.

use tracing::debug;

const ADDRESS_LENGTH: usize = 17;
const UUID_LENGTH: usize = 36;

/// `(hex+ sep)+ hex+`
fn is_hex_groups(value: &str, separator: char) -> bool {
    let mut groups = 0;
    for group in value.split(separator) {
        if group.is_empty() || !group.chars().all(|c| c.is_ascii_hexdigit()) {
            return false;
        }
        groups += 1;
    }
    groups >= 2
}

pub fn is_valid_address(address: &str) -> bool {
    if !is_hex_groups(address, ':') {
        debug!("Address {:?} does not match the hex group pattern", address);
        return false;
    }
    address.len() == ADDRESS_LENGTH
}

pub fn is_valid_uuid(uuid: &str) -> bool {
    if !is_hex_groups(uuid, '-') {
        debug!("UUID {:?} does not match the hex group pattern", uuid);
        return false;
    }
    uuid.len() == UUID_LENGTH
}
