//! Generated client ids

use rand::seq::SliceRandom;
use rand::Rng;

const ADJECTIVES: &[&str] = &[
    "amber", "brave", "calm", "clever", "crisp", "dusty", "eager", "fancy", "gentle", "happy",
    "icy", "jolly", "keen", "lively", "lucky", "mellow", "nimble", "proud", "quick", "quiet",
    "rapid", "shiny", "silent", "sunny", "swift", "tidy", "vivid", "witty", "young", "zesty",
];

const NOUNS: &[&str] = &[
    "badger", "beacon", "cactus", "comet", "coral", "falcon", "fern", "glacier", "harbor", "heron",
    "island", "lantern", "lynx", "maple", "meadow", "otter", "panda", "pebble", "puffin", "quartz",
    "raven", "river", "summit", "thistle", "tiger", "tundra", "walrus", "willow", "wombat", "yak",
];

/// Random id of the form `<adjective>-<noun>-<n>`
pub fn generate_client_id() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("quiet");
    let noun = NOUNS.choose(&mut rng).copied().unwrap_or("otter");
    format!("{}-{}-{}", adjective, noun, rng.gen_range(1..1000))
}
