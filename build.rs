fn main() {
    // ESP-IDF link arguments are only meaningful for the firmware target;
    // host builds of the library and its tests skip them.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
}
