//! Descriptive labels for peers
//!
//! A label is what other devices see in their peer list: the platform details
//! sniffed from the user agent, a short device name, and a friendly display
//! name such as "Teal Otter". The display name is a pure function of the
//! identity token so a returning device keeps its name across reconnects.

use serde::{Deserialize, Serialize};

use crate::device::{DeviceClass, UserAgent};
use crate::identity::token_hash;

const COLOURS: &[&str] = &[
    "Amber", "Aqua", "Azure", "Beige", "Black", "Blue", "Bronze", "Brown", "Coral", "Crimson",
    "Cyan", "Gold", "Gray", "Green", "Indigo", "Ivory", "Jade", "Lavender", "Lime", "Magenta",
    "Maroon", "Mint", "Navy", "Olive", "Orange", "Peach", "Pink", "Plum", "Purple", "Red",
    "Rose", "Ruby", "Salmon", "Sapphire", "Silver", "Tan", "Teal", "Turquoise", "Violet",
    "White", "Yellow",
];

const ANIMALS: &[&str] = &[
    "Alpaca", "Badger", "Beaver", "Bison", "Cheetah", "Crane", "Dolphin", "Eagle", "Falcon",
    "Ferret", "Fox", "Gazelle", "Gecko", "Heron", "Hedgehog", "Ibis", "Jaguar", "Koala",
    "Lemur", "Lynx", "Marmot", "Meerkat", "Moose", "Narwhal", "Ocelot", "Otter", "Owl",
    "Panda", "Pelican", "Penguin", "Puffin", "Quail", "Raccoon", "Raven", "Salamander",
    "Seal", "Sparrow", "Tapir", "Tiger", "Toucan", "Walrus", "Wombat", "Yak", "Zebra",
];

/// Descriptive label bundle for one peer, immutable once built
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerLabel {
    pub model: Option<String>,
    pub os: Option<String>,
    pub browser: Option<String>,
    #[serde(rename = "type")]
    pub device_type: Option<DeviceClass>,
    pub device_name: String,
    pub display_name: String,
}

impl PeerLabel {
    /// Build the label for `peer_id` connecting with the given user agent
    pub fn new(peer_id: &str, user_agent: Option<&str>) -> Self {
        let ua = user_agent.map(UserAgent::parse).unwrap_or_default();
        let device_name = device_name(&ua);

        Self {
            model: ua.model,
            os: ua.os,
            browser: ua.browser,
            device_type: ua.class,
            device_name,
            display_name: display_name(peer_id),
        }
    }
}

/// "Mac Firefox", "Android Pixel 7", "iOS iPhone", or "Unknown Device"
fn device_name(ua: &UserAgent) -> String {
    let mut name = String::new();

    if let Some(os) = &ua.os {
        name.push_str(&os.replace("Mac OS", "Mac"));
        name.push(' ');
    }

    match (&ua.model, &ua.browser) {
        (Some(model), _) => name.push_str(model),
        (None, Some(browser)) => name.push_str(browser),
        (None, None) => {}
    }

    let name = name.trim().to_string();
    if name.is_empty() {
        "Unknown Device".to_string()
    } else {
        name
    }
}

/// Deterministic "<Colour> <Animal>" name for an identity token
pub fn display_name(peer_id: &str) -> String {
    let hash = token_hash(peer_id);
    let colour = COLOURS[(hash % COLOURS.len() as u64) as usize];
    let animal = ANIMALS[((hash >> 32) % ANIMALS.len() as u64) as usize];
    format!("{} {}", colour, animal)
}
