use platform_automation::datastore::{NewUser, UserRepository};
use std::fs::File;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// Write `len` bytes to `path` and backdate its mtime by `age`.
#[allow(dead_code)]
pub fn write_aged_file(path: &Path, len: usize, age: Duration) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, vec![b'x'; len]).unwrap();
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() - age)
        .unwrap();
}

#[allow(dead_code)]
pub fn seed_users(users: &dyn UserRepository, count: usize) {
    for i in 0..count {
        users
            .create_user(&NewUser {
                email: format!("user{}@example.com", i),
                name: format!("User {}", i),
            })
            .unwrap();
    }
}
