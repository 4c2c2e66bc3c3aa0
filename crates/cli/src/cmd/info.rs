use kiln_lib::consts::STORE_ENV_VAR;
use kiln_lib::platform::TargetPlatform;
use kiln_lib::platform::paths::{data_dir, store_dir};

pub fn cmd_info() {
  println!("kiln {}", env!("CARGO_PKG_VERSION"));
  println!("Platform: {}", TargetPlatform::default());
  println!("Data:     {}", data_dir().display());
  println!("Store:    {}", store_dir().display());
  if std::env::var_os(STORE_ENV_VAR).is_some() {
    println!("          (from {STORE_ENV_VAR})");
  }
}
