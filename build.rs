fn main() {
    // ESP-IDF environment is only needed for the firmware (xtensa and riscv
    // ESP32 parts alike); host builds of the client and tests skip it.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
}
