#![no_main]

use std::path::Path;

use libfuzzer_sys::fuzz_target;

use shellgram::registry::CommandRegistry;

fuzz_target!(|data: &[u8]| {
    let Ok(json) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(registry) = CommandRegistry::from_json(json, "commands") else {
        return;
    };

    let _ = registry.render_help();
    let menu = registry.menu_entries();
    assert!(menu.len() >= registry.len());

    for command in registry.commands() {
        if let Ok(path) = registry.resolve_script(command) {
            // Resolved scripts never leave the commands directory.
            assert!(path.starts_with(Path::new("commands")));
        }
    }
});
