use std::process::Command;

#[test]
fn fails_without_jwt_secret() {
    let exe = env!("CARGO_BIN_EXE_quizline");
    let output = Command::new(exe)
        .env_remove("JWT_SECRET")
        .env("STORAGE_BACKEND", "memory")
        .output()
        .expect("failed to run quizline binary");
    assert!(!output.status.success());
}
