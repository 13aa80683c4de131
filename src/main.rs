use std::io::{BufRead, Write as _};

use fat12_fs::{
    console::StdConsole,
    dir::DirName,
    exec::{Session, install_session},
    format::{FormatVolumeOptionsBuilder, Formatter},
    shell::Shell,
    volume::Volume,
};

fn main() {
    let options = FormatVolumeOptionsBuilder::default()
        .label("bootdisk")
        .build()
        .unwrap();
    let image = Formatter::try_from(options).unwrap().build_image();

    let mut volume = Volume::mount(image).unwrap();
    volume
        .write_file(&DirName::new("readme.txt"), b"a freshly formatted disk\n")
        .unwrap();

    let _ = install_session(Session::new(volume, Box::new(StdConsole::new())));

    let mut shell = Shell::new();
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush().unwrap();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap() == 0 {
            break;
        }
        if let Err(err) = shell.run_line(line.trim_end()) {
            println!("{err}");
        }
    }
}
