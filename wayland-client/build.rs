fn main() {
    let out_dir = std::env::var("OUT_DIR").expect("OUT_DIR set by cargo");
    let xml_path = "protocols/wayland.xml";
    println!("cargo:rerun-if-changed={xml_path}");

    wayland_scanner::generate_client_code(xml_path, format!("{out_dir}/wayland.rs"))
        .unwrap_or_else(|e| panic!("generating protocol bindings from {xml_path}: {e}"));
}
